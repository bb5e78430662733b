// Session engine: one task's timer over its segment ledger
//
// All transitions happen under a single mutex that also guards the segment
// list. The tick worker is a tokio task; it only holds a weak handle to the
// engine and is stopped through a oneshot taken out of the locked state, so
// a stop can never be delivered twice.

use crate::clock::{between, Clock};
use crate::state::TimeBoxState;
use crate::task::SessionTarget;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Events emitted by a session, in order, on a single stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Tick {
        elapsed: Duration,
        remaining: Duration,
    },
    Paused,
    Resumed,
    Completed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Stopped)
    }
}

struct Inner {
    phase: SessionPhase,
    state: TimeBoxState,
    /// Bumped whenever a worker is spawned; ticks from older workers are dropped
    generation: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        // The reader may be gone (driver exited); events are best effort
        let _ = self.events_tx.send(event);
    }

    fn halt_worker(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

struct Shared {
    clock: Arc<dyn Clock>,
    target: SessionTarget,
    tick_interval: Duration,
    inner: StdMutex<Inner>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

/// Handle to a running or finished session. Clones share the same session.
#[derive(Clone)]
pub struct SessionEngine {
    shared: Arc<Shared>,
}

impl SessionEngine {
    /// Create an idle session over `state`, the task's ledger entry
    pub fn new(
        clock: Arc<dyn Clock>,
        target: SessionTarget,
        state: TimeBoxState,
        tick_interval: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                clock,
                target,
                tick_interval,
                inner: StdMutex::new(Inner {
                    phase: SessionPhase::Idle,
                    state,
                    generation: 0,
                    stop_tx: None,
                    events_tx,
                }),
                events_rx: StdMutex::new(Some(events_rx)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The event stream. Only the first caller gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.shared
            .events_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn target(&self) -> SessionTarget {
        self.shared.target
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn task_hash(&self) -> String {
        self.lock().state.task_hash.clone()
    }

    /// Copy of the ledger entry as it stands now
    pub fn snapshot(&self) -> TimeBoxState {
        self.lock().state.clone()
    }

    /// Idle -> Running. Must be called inside a tokio runtime.
    pub fn start(&self) -> bool {
        let mut inner = self.lock();
        if inner.phase != SessionPhase::Idle {
            return false;
        }
        let now = self.shared.clock.now();
        // A ledger restored with an open segment keeps that segment
        inner.state.open_segment(now);
        inner.phase = SessionPhase::Running;
        self.spawn_worker(&mut inner);
        log::info!("Session {} started", short(&inner.state.task_hash));
        true
    }

    /// Running -> Paused
    pub fn pause(&self) -> bool {
        let mut inner = self.lock();
        if inner.phase != SessionPhase::Running {
            return false;
        }
        let now = self.shared.clock.now();
        inner.state.close_open_segment(now);
        inner.halt_worker();
        inner.phase = SessionPhase::Paused;
        inner.emit(SessionEvent::Paused);
        log::info!("Session {} paused", short(&inner.state.task_hash));
        true
    }

    /// Paused -> Running
    pub fn resume(&self) -> bool {
        let mut inner = self.lock();
        if inner.phase != SessionPhase::Paused {
            return false;
        }
        let now = self.shared.clock.now();
        inner.state.open_segment(now);
        inner.phase = SessionPhase::Running;
        self.spawn_worker(&mut inner);
        inner.emit(SessionEvent::Resumed);
        log::info!("Session {} resumed", short(&inner.state.task_hash));
        true
    }

    /// Any non-terminal phase -> Completed. Returns false if already terminal.
    pub fn complete(&self) -> bool {
        let mut inner = self.lock();
        let now = self.shared.clock.now();
        finish(&mut inner, SessionPhase::Completed, now)
    }

    /// Any non-terminal phase -> Stopped, without marking completion
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        let now = self.shared.clock.now();
        finish(&mut inner, SessionPhase::Stopped, now)
    }

    /// Signal path: stop the session and hand back the closed ledger entry
    pub fn interrupt(&self) -> TimeBoxState {
        let mut inner = self.lock();
        let now = self.shared.clock.now();
        if !finish(&mut inner, SessionPhase::Stopped, now) {
            inner.state.close_open_segment(now);
        }
        inner.state.clone()
    }

    pub fn total_elapsed(&self) -> Duration {
        let now = self.shared.clock.now();
        self.lock().state.total_elapsed(now)
    }

    pub fn remaining(&self) -> Duration {
        let now = self.shared.clock.now();
        let elapsed = self.lock().state.total_elapsed(now);
        remaining_for(self.shared.target, elapsed, now)
    }

    fn spawn_worker(&self, inner: &mut Inner) {
        inner.halt_worker();
        inner.generation += 1;
        let generation = inner.generation;
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        inner.stop_tx = Some(stop_tx);

        // Registered before returning so that no tick is missed
        let mut ticker = self.shared.clock.ticker(self.shared.tick_interval);
        let weak = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    tick = ticker.tick() => {
                        if tick.is_none() || !on_tick(&weak, generation) {
                            break;
                        }
                    }
                }
            }
        });
    }
}

/// Handle one tick. Returns false once the worker should exit.
fn on_tick(weak: &Weak<Shared>, generation: u64) -> bool {
    let Some(shared) = weak.upgrade() else {
        return false;
    };
    let mut inner = shared
        .inner
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if inner.generation != generation || inner.phase != SessionPhase::Running {
        return false;
    }

    let now = shared.clock.now();
    let elapsed = inner.state.total_elapsed(now);
    let remaining = remaining_for(shared.target, elapsed, now);
    inner.emit(SessionEvent::Tick { elapsed, remaining });

    if is_time_up(shared.target, elapsed, now) {
        finish(&mut inner, SessionPhase::Completed, now);
        return false;
    }
    true
}

/// Compare-and-set into a terminal phase. Only the first caller wins.
fn finish(inner: &mut Inner, phase: SessionPhase, now: DateTime<Utc>) -> bool {
    debug_assert!(phase.is_terminal());
    if inner.phase.is_terminal() {
        return false;
    }
    inner.state.close_open_segment(now);
    inner.halt_worker();
    inner.phase = phase;
    let event = match phase {
        SessionPhase::Completed => SessionEvent::Completed,
        _ => SessionEvent::Stopped,
    };
    inner.emit(event);
    log::info!(
        "Session {} {:?} after {}s",
        short(&inner.state.task_hash),
        phase,
        inner.state.total_elapsed(now).as_secs()
    );
    true
}

fn is_time_up(target: SessionTarget, elapsed: Duration, now: DateTime<Utc>) -> bool {
    match target {
        SessionTarget::Duration(total) => elapsed >= total,
        SessionTarget::EndsAt(end) => now >= end,
    }
}

fn remaining_for(target: SessionTarget, elapsed: Duration, now: DateTime<Utc>) -> Duration {
    match target {
        SessionTarget::Duration(total) => total.saturating_sub(elapsed),
        SessionTarget::EndsAt(end) => between(now, end),
    }
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}
