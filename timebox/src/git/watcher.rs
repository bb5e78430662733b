// Background commit polling for the length of a session

use super::{commit_key, CommitSource, GitError};
use crate::clock::Clock;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Streams commits made after `since`, each hash prefix at most once
pub struct CommitWatcher {
    source: Arc<dyn CommitSource>,
    clock: Arc<dyn Clock>,
    since: Option<DateTime<Utc>>,
    seen: Arc<StdMutex<HashSet<String>>>,
    polling: Arc<AtomicBool>,
    stop_tx: StdMutex<Option<oneshot::Sender<()>>>,
    commits_tx: mpsc::UnboundedSender<String>,
    errors_tx: mpsc::UnboundedSender<GitError>,
    commits_rx: Option<mpsc::UnboundedReceiver<String>>,
    errors_rx: Option<mpsc::UnboundedReceiver<GitError>>,
}

impl CommitWatcher {
    pub fn new(source: Arc<dyn CommitSource>, clock: Arc<dyn Clock>) -> Self {
        let (commits_tx, commits_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        Self {
            source,
            clock,
            since: None,
            seen: Arc::new(StdMutex::new(HashSet::new())),
            polling: Arc::new(AtomicBool::new(false)),
            stop_tx: StdMutex::new(None),
            commits_tx,
            errors_tx,
            commits_rx: Some(commits_rx),
            errors_rx: Some(errors_rx),
        }
    }

    /// Begin polling every `poll_interval`. Returns false if already started.
    /// Must be called inside a tokio runtime.
    pub fn start(&mut self, since: DateTime<Utc>, poll_interval: Duration) -> bool {
        if self.since.is_some() {
            return false;
        }
        self.since = Some(since);

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        *self
            .stop_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(stop_tx);
        self.polling.store(true, Ordering::SeqCst);

        let mut ticker = self.clock.ticker(poll_interval);
        let source = Arc::clone(&self.source);
        let seen = Arc::clone(&self.seen);
        let polling = Arc::clone(&self.polling);
        let commits_tx = self.commits_tx.clone();
        let errors_tx = self.errors_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    tick = ticker.tick() => {
                        if tick.is_none() {
                            break;
                        }
                        match query(&source, since).await {
                            Ok(commits) => {
                                for commit in dedup(&seen, commits) {
                                    let _ = commits_tx.send(commit);
                                }
                            }
                            Err(e) if e.is_fatal() => {
                                log::warn!("Commit polling stopped: {}", e);
                                polling.store(false, Ordering::SeqCst);
                                let _ = errors_tx.send(e);
                                break;
                            }
                            Err(e) => {
                                log::warn!("Commit poll failed: {}", e);
                                let _ = errors_tx.send(e);
                            }
                        }
                    }
                }
            }
            polling.store(false, Ordering::SeqCst);
        });
        true
    }

    /// Stream of newly observed commits. Only the first caller gets it.
    pub fn commits(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.commits_rx.take()
    }

    /// Stream of poll failures. Only the first caller gets it.
    pub fn errors(&mut self) -> Option<mpsc::UnboundedReceiver<GitError>> {
        self.errors_rx.take()
    }

    /// Halt polling. Safe to call repeatedly or after polling gave up.
    pub fn stop(&self) {
        let stop_tx = self
            .stop_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    /// One query outside the poll loop. Returns only commits not seen before;
    /// they are not sent on the commit stream.
    pub async fn poll_once(&self) -> Result<Vec<String>, GitError> {
        let since = self.since.unwrap_or_else(|| self.clock.now());
        let commits = query(&self.source, since).await?;
        Ok(dedup(&self.seen, commits))
    }
}

impl Drop for CommitWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn query(
    source: &Arc<dyn CommitSource>,
    since: DateTime<Utc>,
) -> Result<Vec<String>, GitError> {
    let source = Arc::clone(source);
    tokio::task::spawn_blocking(move || source.commits_since(since))
        .await
        .map_err(|e| GitError::Spawn(std::io::Error::other(e)))?
}

fn dedup(seen: &StdMutex<HashSet<String>>, commits: Vec<String>) -> Vec<String> {
    let mut seen = seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    commits
        .into_iter()
        .filter(|commit| seen.insert(commit_key(commit)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::TimeZone;
    use std::collections::VecDeque;

    const POLL: Duration = Duration::from_secs(5);

    /// Replays canned responses, then returns no commits
    struct ScriptedSource {
        responses: StdMutex<VecDeque<Result<Vec<String>, GitError>>>,
        calls: StdMutex<Vec<DateTime<Utc>>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<&str>, GitError>>) -> Arc<Self> {
            let responses = responses
                .into_iter()
                .map(|r| r.map(|lines| lines.into_iter().map(String::from).collect()))
                .collect();
            Arc::new(Self {
                responses: StdMutex::new(responses),
                calls: StdMutex::new(Vec::new()),
            })
        }
    }

    impl CommitSource for ScriptedSource {
        fn commits_since(&self, since: DateTime<Utc>) -> Result<Vec<String>, GitError> {
            self.calls.lock().unwrap().push(since);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn failed() -> GitError {
        GitError::CommandFailed {
            status: "exit status: 1".into(),
            output: "boom".into(),
        }
    }

    #[tokio::test]
    async fn test_overlapping_polls_emit_each_commit_once() {
        let clock = MockClock::new(t0());
        let source = ScriptedSource::new(vec![
            Ok(vec!["bbbbbbb Second", "aaaaaaa First"]),
            Ok(vec!["ccccccc Third", "bbbbbbb Second", "aaaaaaa First"]),
        ]);
        let mut watcher = CommitWatcher::new(source.clone(), Arc::new(clock.clone()));
        let mut commits = watcher.commits().unwrap();
        assert!(watcher.start(t0(), POLL));
        assert!(!watcher.start(t0(), POLL));

        clock.advance(POLL);
        assert_eq!(commits.recv().await.unwrap(), "bbbbbbb Second");
        assert_eq!(commits.recv().await.unwrap(), "aaaaaaa First");

        clock.advance(POLL);
        assert_eq!(commits.recv().await.unwrap(), "ccccccc Third");

        watcher.stop();
        assert!(commits.try_recv().is_err());
        assert!(source.calls.lock().unwrap().iter().all(|s| *s == t0()));
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_polling_continues() {
        let clock = MockClock::new(t0());
        let source = ScriptedSource::new(vec![Err(failed()), Ok(vec!["ddddddd Recovered"])]);
        let mut watcher = CommitWatcher::new(source, Arc::new(clock.clone()));
        let mut commits = watcher.commits().unwrap();
        let mut errors = watcher.errors().unwrap();
        watcher.start(t0(), POLL);

        clock.advance(POLL);
        let err = errors.recv().await.unwrap();
        assert!(matches!(err, GitError::CommandFailed { .. }));
        assert!(watcher.is_polling());

        clock.advance(POLL);
        assert_eq!(commits.recv().await.unwrap(), "ddddddd Recovered");
        watcher.stop();
    }

    #[tokio::test]
    async fn test_not_a_repository_stops_polling() {
        let clock = MockClock::new(t0());
        let source = ScriptedSource::new(vec![Err(GitError::NotARepository("fatal".into()))]);
        let mut watcher = CommitWatcher::new(source.clone(), Arc::new(clock.clone()));
        let mut errors = watcher.errors().unwrap();
        watcher.start(t0(), POLL);

        clock.advance(POLL);
        let err = errors.recv().await.unwrap();
        assert!(err.is_fatal());
        assert!(!watcher.is_polling());

        // Further ticks are not polled; stop is still safe
        clock.advance(POLL * 3);
        tokio::task::yield_now().await;
        assert_eq!(source.calls.lock().unwrap().len(), 1);
        watcher.stop();
        watcher.stop();
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_poll_once_shares_seen_set() {
        let clock = MockClock::new(t0());
        let source = ScriptedSource::new(vec![
            Ok(vec!["aaaaaaa First"]),
            Ok(vec!["bbbbbbb Second", "aaaaaaa First"]),
        ]);
        let mut watcher = CommitWatcher::new(source, Arc::new(clock.clone()));
        let mut commits = watcher.commits().unwrap();
        watcher.start(t0(), POLL);

        clock.advance(POLL);
        assert_eq!(commits.recv().await.unwrap(), "aaaaaaa First");
        watcher.stop();

        let fresh = watcher.poll_once().await.unwrap();
        assert_eq!(fresh, vec!["bbbbbbb Second"]);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_harmless() {
        let clock = MockClock::new(t0());
        let watcher = CommitWatcher::new(ScriptedSource::new(vec![]), Arc::new(clock));
        watcher.stop();
        assert!(!watcher.is_polling());
        assert!(watcher.since().is_none());
    }
}
