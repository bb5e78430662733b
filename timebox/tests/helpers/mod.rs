//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use timebox_lib::session::SessionEvent;
use tokio::sync::mpsc::UnboundedReceiver;

pub const TICK: Duration = Duration::from_secs(1);

/// Fixed starting instant for every mock clock
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

/// Write a TODO file into `dir` and return its path
pub fn write_todo(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("TODO.md");
    std::fs::write(&path, content).unwrap();
    path
}

/// Give spawned workers a chance to consume what the mock clock delivered
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Everything currently queued on an event stream
pub fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
