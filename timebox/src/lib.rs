// Timebox: run a timed session against one task of a Markdown TODO list,
// keep a crash-safe ledger of the time spent, and mark the task done in
// place when the session completes.

pub mod clock;
pub mod config;
pub mod error;
pub mod git;
pub mod markdown;
pub mod render;
pub mod rewrite;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod task;
pub mod tracker;

pub use error::{Error, Result};
