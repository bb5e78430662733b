// Plain one-line status renderer for the non-TUI driver

use crate::session::SessionEngine;
use std::time::Duration;

/// What the status line needs from a running session
pub trait Tickable {
    fn remaining(&self) -> Duration;
    fn total_elapsed(&self) -> Duration;
}

impl Tickable for SessionEngine {
    fn remaining(&self) -> Duration {
        SessionEngine::remaining(self)
    }

    fn total_elapsed(&self) -> Duration {
        SessionEngine::total_elapsed(self)
    }
}

/// "MM:SS", or "H:MM:SS" past an hour
pub fn format_clock(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

/// Carriage-return status line that remembers how much it last drew
#[derive(Debug, Default)]
pub struct StatusLine {
    last_width: usize,
    max_width: Option<usize>,
}

impl StatusLine {
    /// Clamp to the current terminal width, if there is a terminal
    pub fn for_terminal() -> Self {
        let max_width = crossterm::terminal::size()
            .ok()
            .map(|(cols, _)| cols as usize)
            .filter(|&cols| cols > 1);
        Self {
            last_width: 0,
            max_width,
        }
    }

    pub fn with_width(max_width: usize) -> Self {
        Self {
            last_width: 0,
            max_width: Some(max_width),
        }
    }

    pub fn last_width(&self) -> usize {
        self.last_width
    }

    /// Text to write so the line shows `label` with the session clock
    pub fn render(&mut self, label: &str, session: &dyn Tickable, paused: bool) -> String {
        let state = if paused { " [paused]" } else { "" };
        let line = format!(
            "{} | {} left | {} elapsed{}",
            label,
            format_clock(session.remaining()),
            format_clock(session.total_elapsed()),
            state
        );
        self.draw(&line)
    }

    /// Text that blanks the current line
    pub fn clear(&mut self) -> String {
        let out = format!("\r{}\r", " ".repeat(self.last_width));
        self.last_width = 0;
        out
    }

    fn draw(&mut self, line: &str) -> String {
        // Leave the last column free so the cursor never wraps
        let limit = self.max_width.map(|w| w - 1).unwrap_or(usize::MAX);
        let clipped: String = line.chars().take(limit).collect();
        let width = clipped.chars().count();
        let pad = self.last_width.saturating_sub(width);
        self.last_width = width;
        format!("\r{}{}", clipped, " ".repeat(pad))
    }
}
