// Structural scan of a Markdown TODO file
//
// Finds every checkbox list item and reports byte spans into the original
// text. Nothing here re-renders Markdown; the rewriter maps the spans back
// to lines and edits the original bytes.
//
// Task format: - [ ] Description @1h30m
//              * [x] Description @[10:00-13:00]

use crate::task::Task;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use std::ops::Range;

/// A checkbox item located in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub task: Task,
    /// Byte span of the whole list item, nested lists included
    pub item_span: Range<usize>,
    /// Byte span of the item's own text (marker up to the first nested list)
    pub own_span: Range<usize>,
}

impl TaskEntry {
    pub fn hash(&self) -> String {
        self.task.hash()
    }
}

#[derive(Default)]
struct ItemFrame {
    start: usize,
    marker: Option<(bool, usize)>,
    text_end: Option<usize>,
    in_first_paragraph: bool,
    seen_paragraph: bool,
}

/// Scan `content` for checkbox list items, in document order
pub fn scan_tasks(content: &str) -> Vec<TaskEntry> {
    let parser = Parser::new_ext(content, Options::ENABLE_TASKLISTS);
    let mut stack: Vec<ItemFrame> = Vec::new();
    let mut entries = Vec::new();

    for (event, range) in parser.into_offset_iter() {
        match event {
            Event::Start(Tag::Item) => stack.push(ItemFrame {
                start: range.start,
                ..ItemFrame::default()
            }),
            // Tight items have no paragraph events; the first child block ends the text
            Event::Start(
                Tag::List(_)
                | Tag::CodeBlock(_)
                | Tag::BlockQuote(_)
                | Tag::HtmlBlock
                | Tag::Heading { .. }
                | Tag::Table(_),
            )
            | Event::Rule => {
                if let Some(frame) = stack.last_mut() {
                    frame.text_end.get_or_insert(range.start);
                }
            }
            Event::Start(Tag::Paragraph) => {
                if let Some(frame) = stack.last_mut() {
                    if !frame.seen_paragraph && frame.text_end.is_none() {
                        frame.seen_paragraph = true;
                        frame.in_first_paragraph = true;
                    }
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if let Some(frame) = stack.last_mut() {
                    if frame.in_first_paragraph {
                        frame.in_first_paragraph = false;
                        frame.text_end.get_or_insert(range.end);
                    }
                }
            }
            Event::TaskListMarker(checked) => {
                if let Some(frame) = stack.last_mut() {
                    if frame.marker.is_none() {
                        frame.marker = Some((checked, range.end));
                    }
                }
            }
            Event::End(TagEnd::Item) => {
                let Some(frame) = stack.pop() else {
                    continue;
                };
                let Some((checked, marker_end)) = frame.marker else {
                    continue;
                };
                let own_end = frame.text_end.unwrap_or(range.end).min(range.end);
                let text_start = marker_end.min(own_end);
                let task = Task::from_inline(&content[text_start..own_end], checked);
                entries.push(TaskEntry {
                    task,
                    item_span: frame.start..range.end,
                    own_span: frame.start..own_end,
                });
            }
            _ => {}
        }
    }

    // Items close innermost-first; report them in reading order
    entries.sort_by_key(|e| e.item_span.start);
    entries
}

/// Find the first task whose description starts with `key` (case-insensitive)
pub fn find_task_by_key<'a>(entries: &'a [TaskEntry], key: &str) -> Option<&'a TaskEntry> {
    let key_lower = key.to_lowercase();
    entries
        .iter()
        .find(|e| e.task.description.to_lowercase().starts_with(&key_lower))
}

/// Find a task by identity hash, preferring an unchecked occurrence
pub fn find_task_by_hash<'a>(entries: &'a [TaskEntry], hash: &str) -> Option<&'a TaskEntry> {
    let mut matching = entries.iter().filter(|e| e.hash() == hash);
    let first = matching.next()?;
    if !first.task.checked {
        return Some(first);
    }
    matching.find(|e| !e.task.checked).or(Some(first))
}
