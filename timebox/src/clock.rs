// Clock abstraction shared by the session engine and the commit watcher
//
// SystemClock is backed by tokio timers. MockClock only moves when a test
// calls `advance`, and fires every ticker that became due on the way.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Source of "now" and of periodic ticks
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// Create a ticker that fires every `period`, first firing one period from now
    fn ticker(&self, period: Duration) -> Ticker;
}

/// Receiving end of a periodic timer
///
/// Dropping the ticker stops it.
pub struct Ticker {
    rx: mpsc::UnboundedReceiver<DateTime<Utc>>,
    task: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Wait for the next tick. Returns None once the clock side has gone away.
    pub async fn tick(&mut self) -> Option<DateTime<Utc>> {
        self.rx.recv().await
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Wall clock. `ticker` must be called from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn ticker(&self, period: Duration) -> Ticker {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tx.send(Utc::now()).is_err() {
                    break;
                }
            }
        });
        Ticker {
            rx,
            task: Some(task),
        }
    }
}

struct MockTicker {
    period: Duration,
    last: DateTime<Utc>,
    tx: mpsc::UnboundedSender<DateTime<Utc>>,
}

struct MockClockInner {
    now: DateTime<Utc>,
    tickers: Vec<MockTicker>,
}

/// Manually driven clock for tests
#[derive(Clone)]
pub struct MockClock {
    inner: Arc<Mutex<MockClockInner>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockClockInner {
                now: start,
                tickers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockClockInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move time forward by `by`, delivering every tick that became due
    pub fn advance(&self, by: Duration) {
        let mut inner = self.lock();
        let now = inner.now + to_delta(by);
        inner.now = now;

        inner.tickers.retain(|t| !t.tx.is_closed());
        for ticker in inner.tickers.iter_mut() {
            let period = to_delta(ticker.period);
            if period <= chrono::TimeDelta::zero() {
                continue;
            }
            while ticker.last + period <= now {
                ticker.last += period;
                let _ = ticker.tx.send(ticker.last);
            }
        }
    }

    /// Number of tickers whose receiver is still alive
    pub fn active_tickers(&self) -> usize {
        let inner = self.lock();
        inner.tickers.iter().filter(|t| !t.tx.is_closed()).count()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let inner = self.lock();
        inner.now
    }

    fn ticker(&self, period: Duration) -> Ticker {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let last = inner.now;
        inner.tickers.push(MockTicker { period, last, tx });
        Ticker { rx, task: None }
    }
}

/// Convert a std duration to a chrono delta, saturating on overflow
pub fn to_delta(d: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(d).unwrap_or(chrono::TimeDelta::MAX)
}

/// Non-negative std duration between two instants
pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or_default()
}
