// Termination signals: close the open segment and flush the ledger before exit

use crate::error::Result;
use crate::session::SessionEngine;
use crate::state::TimeBoxState;
use crate::tracker::TaskTracker;
use std::sync::Mutex as StdMutex;

#[cfg(unix)]
use signal_hook::{
    consts::signal::{SIGINT, SIGTERM},
    iterator::{Handle as SignalHandle, Signals},
};
#[cfg(unix)]
use std::{sync::Arc, thread};

/// Stop the session and persist its ledger entry
///
/// Holds the engine lock only while closing the segment, then the tracker
/// lock while saving.
pub fn flush_on_signal(
    engine: &SessionEngine,
    tracker: &StdMutex<TaskTracker>,
) -> Result<TimeBoxState> {
    let state = engine.interrupt();
    let mut tracker = tracker
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    tracker.record(state.clone())?;
    Ok(state)
}

/// Conventional shell exit status for a fatal signal
pub fn exit_code(signal: i32) -> i32 {
    128 + signal
}

/// Background thread turning SIGINT/SIGTERM into a flush and process exit
#[cfg(unix)]
pub struct SignalGuard {
    handle: SignalHandle,
    thread: Option<thread::JoinHandle<()>>,
}

#[cfg(unix)]
impl SignalGuard {
    pub fn install(
        engine: SessionEngine,
        tracker: Arc<StdMutex<TaskTracker>>,
    ) -> std::io::Result<Self> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let handle = signals.handle();
        let thread = thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                log::info!("Received signal {}, saving session", signal);
                let code = match flush_on_signal(&engine, &tracker) {
                    Ok(state) => {
                        log::info!(
                            "Saved {} segment(s) for {}",
                            state.segments.len(),
                            state.task_hash
                        );
                        exit_code(signal)
                    }
                    Err(e) => {
                        log::error!("Failed to save session on signal {}: {}", signal, e);
                        1
                    }
                };
                eprintln!();
                std::process::exit(code);
            }
        });
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Unregister the handlers and wait for the thread to finish
    pub fn stop(mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::state::{InMemoryStateStore, StateStore};
    use crate::task::SessionTarget;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(SIGINT), 130);
        assert_eq!(exit_code(SIGTERM), 143);
    }

    #[tokio::test]
    async fn test_flush_closes_segment_and_saves() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let store = Arc::new(InMemoryStateStore::new());
        let tracker = StdMutex::new(TaskTracker::open(store.clone()).unwrap());

        let engine = SessionEngine::new(
            Arc::new(clock.clone()),
            SessionTarget::Duration(Duration::from_secs(600)),
            TimeBoxState::new("abc"),
            Duration::from_secs(1),
        );
        engine.start();
        clock.advance(Duration::from_secs(42));

        let state = flush_on_signal(&engine, &tracker).unwrap();
        assert!(!state.is_active());

        let saved = store.load().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].total_elapsed(clock.now()), Duration::from_secs(42));
        assert!(!saved[0].is_active());
    }

    #[tokio::test]
    async fn test_flush_after_completion_keeps_elapsed() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let store = Arc::new(InMemoryStateStore::new());
        let tracker = StdMutex::new(TaskTracker::open(store.clone()).unwrap());

        let engine = SessionEngine::new(
            Arc::new(clock.clone()),
            SessionTarget::Duration(Duration::from_secs(600)),
            TimeBoxState::new("abc"),
            Duration::from_secs(1),
        );
        engine.start();
        clock.advance(Duration::from_secs(30));
        assert!(engine.complete());

        // A signal during the final commit poll or rewrite must still save
        clock.advance(Duration::from_secs(30));
        let state = flush_on_signal(&engine, &tracker).unwrap();
        assert_eq!(state.total_elapsed(clock.now()), Duration::from_secs(30));
        assert_eq!(state.segments.len(), 1);
        assert_eq!(store.load().unwrap(), vec![state]);
    }

    #[test]
    fn test_guard_install_and_stop() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let tracker = Arc::new(StdMutex::new(
            TaskTracker::open(Arc::new(InMemoryStateStore::new())).unwrap(),
        ));
        let engine = SessionEngine::new(
            Arc::new(clock),
            SessionTarget::Duration(Duration::from_secs(60)),
            TimeBoxState::new("abc"),
            Duration::from_secs(1),
        );
        let guard = SignalGuard::install(engine, tracker).unwrap();
        guard.stop();
    }
}
