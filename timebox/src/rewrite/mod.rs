// Task completion rewriter
//
// Locates a task by identity hash through the structural scan, maps its byte
// span back to lines of the original text, and replaces only those lines.
// Everything outside the task's own lines is copied through untouched.

pub mod lines;

use crate::markdown::{find_task_by_hash, scan_tasks, TaskEntry};
use lines::{split_terminator, LineRewriter};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    #[error("task {hash} not found in document")]
    NotFound { hash: String },
    #[error("task \"{description}\" is already checked")]
    AlreadyCompleted { description: String },
    #[error("no unchecked checkbox in task \"{description}\"")]
    MarkerMissing { description: String },
    #[error("line {line} is before the rewrite cursor at {cursor}")]
    LineOrder { line: usize, cursor: usize },
    #[error("line range {start}..={end} is outside a document of {lines} lines")]
    LineRange {
        start: usize,
        end: usize,
        lines: usize,
    },
}

/// What to record on a finished task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub task_hash: String,
    pub elapsed: Duration,
    pub commits: Vec<String>,
}

/// Elapsed annotation, e.g. "1h 5m 0s"
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Mark the task identified by `completion.task_hash` as done in `content`
pub fn rewrite_document(content: &str, completion: &Completion) -> Result<String, RewriteError> {
    let entries = scan_tasks(content);
    let entry = find_task_by_hash(&entries, &completion.task_hash).ok_or_else(|| {
        RewriteError::NotFound {
            hash: completion.task_hash.clone(),
        }
    })?;
    if entry.task.checked {
        return Err(RewriteError::AlreadyCompleted {
            description: entry.task.description.clone(),
        });
    }

    let mut rewriter = LineRewriter::new(content);
    let (first, last) = task_lines(content, entry, &rewriter);
    let original: Vec<&str> = (first..=last).filter_map(|i| rewriter.line(i)).collect();
    let replacement = compose(&original, entry, completion, document_terminator(content))?;

    rewriter.replace_lines(first, last, &replacement)?;
    let rewritten = rewriter.finish();
    log::debug!(
        "Rewrote lines {}..={} for task \"{}\"",
        first,
        last,
        entry.task.description
    );
    Ok(rewritten)
}

/// First and last line of the task's own text, trailing blank lines excluded
fn task_lines(content: &str, entry: &TaskEntry, rewriter: &LineRewriter<'_>) -> (usize, usize) {
    let span = entry.own_span.clone();
    let own = content.get(span.clone()).unwrap_or_default();
    let end = span.start + own.trim_end().len();
    let first = rewriter.line_index_of_byte(span.start);
    let last = rewriter.line_index_of_byte(end.saturating_sub(1).max(span.start));
    (first, last.max(first))
}

fn document_terminator(content: &str) -> &'static str {
    if content.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Build the replacement for the task's lines
fn compose(
    original: &[&str],
    entry: &TaskEntry,
    completion: &Completion,
    default_terminator: &str,
) -> Result<Vec<String>, RewriteError> {
    let mut lines: Vec<String> = original.iter().map(|l| l.to_string()).collect();

    // Toggle the checkbox in place; the rest of the line is left as written
    let (marker_line, marker_at) = lines
        .iter()
        .enumerate()
        .find_map(|(i, l)| l.find("[ ]").map(|at| (i, at)))
        .ok_or_else(|| RewriteError::MarkerMissing {
            description: entry.task.description.clone(),
        })?;
    // Blockquote markers stay so inserted lines remain inside the quote
    let pad: String = lines[marker_line][..marker_at]
        .chars()
        .map(|c| if c == '\t' || c == '>' { c } else { ' ' })
        .collect();
    lines[marker_line].replace_range(marker_at..marker_at + 3, "[x]");

    let Some(last) = lines.pop() else {
        return Ok(lines);
    };
    let (body, terminator) = split_terminator(&last);
    let mut body = body.to_string();
    if completion.elapsed.as_secs() > 0 {
        body.truncate(body.trim_end().len());
        body.push_str("  ⏱️ ");
        body.push_str(&format_elapsed(completion.elapsed));
    }

    if completion.commits.is_empty() {
        lines.push(format!("{}{}", body, terminator));
        return Ok(lines);
    }

    // Inserted lines end the way the task's last line did
    let eol = if terminator.is_empty() {
        default_terminator
    } else {
        terminator
    };
    lines.push(format!("{}{}", body, eol));
    lines.push(format!("{}{}", pad.trim_end(), eol));
    lines.push(format!("{}Commits:{}", pad, eol));
    let count = completion.commits.len();
    for (i, commit) in completion.commits.iter().enumerate() {
        let end = if i + 1 == count { terminator } else { eol };
        lines.push(format!("{}- {}{}", pad, commit.trim(), end));
    }
    Ok(lines)
}
