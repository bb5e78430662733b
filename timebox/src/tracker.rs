// Driver-side orchestration between the document, the ledger and a session
//
// The ledger is loaded once and every change is written through the store
// right away, so a crash loses at most the currently open segment.

use crate::error::{Error, Result};
use crate::markdown::{scan_tasks, TaskEntry};
use crate::rewrite::{rewrite_document, Completion};
use crate::state::{atomic_write, upsert_state, StateError, StateStore, TimeBoxState};
use std::path::Path;
use std::sync::Arc;

/// In-memory copy of the ledger backed by a store
pub struct TaskTracker {
    store: Arc<dyn StateStore>,
    states: Vec<TimeBoxState>,
}

impl TaskTracker {
    pub fn open(store: Arc<dyn StateStore>) -> std::result::Result<Self, StateError> {
        let states = store.load()?;
        Ok(Self { store, states })
    }

    pub fn states(&self) -> &[TimeBoxState] {
        &self.states
    }

    /// The ledger entry for `task_hash`, or a fresh one
    pub fn state_for(&self, task_hash: &str) -> TimeBoxState {
        self.states
            .iter()
            .find(|s| s.task_hash == task_hash)
            .cloned()
            .unwrap_or_else(|| TimeBoxState::new(task_hash))
    }

    /// Merge an updated entry and persist the whole ledger
    pub fn record(&mut self, state: TimeBoxState) -> std::result::Result<(), StateError> {
        let mut next = self.states.clone();
        upsert_state(&mut next, state);
        self.store.save(&next)?;
        self.states = next;
        Ok(())
    }

    /// Drop a finished task's entry and persist
    pub fn finish(&mut self, task_hash: &str) -> std::result::Result<(), StateError> {
        let next = self.store.remove_task_state(&self.states, task_hash);
        self.store.save(&next)?;
        self.states = next;
        Ok(())
    }
}

/// Read and scan a task file
pub fn load_tasks(path: &Path) -> Result<Vec<TaskEntry>> {
    let content =
        std::fs::read_to_string(path).map_err(|e| Error::io("failed to read", path, e))?;
    Ok(scan_tasks(&content))
}

/// First unchecked task with a timebox, optionally matching a description prefix
pub fn next_task<'a>(entries: &'a [TaskEntry], key: Option<&str>) -> Option<&'a TaskEntry> {
    let key = key.map(str::to_lowercase);
    entries.iter().find(|e| {
        !e.task.checked
            && e.task.has_timebox()
            && key
                .as_deref()
                .map_or(true, |k| e.task.description.to_lowercase().starts_with(k))
    })
}

/// Mark the task done in the file as it is on disk now, then drop its ledger entry
///
/// The file is re-read so edits made during the session are kept. If the task
/// cannot be found neither the file nor the ledger is touched.
pub fn complete_in_file(
    tracker: &mut TaskTracker,
    path: &Path,
    completion: &Completion,
) -> Result<String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| Error::io("failed to read", path, e))?;
    let updated = rewrite_document(&content, completion)?;
    atomic_write(path, &updated).map_err(|e| Error::io("failed to write", path, e))?;
    log::info!("Marked task {} done in {}", completion.task_hash, path.display());

    tracker.finish(&completion.task_hash)?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FileStateStore, InMemoryStateStore};
    use crate::task::task_hash;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tempfile::TempDir;

    fn started(hash: &str) -> TimeBoxState {
        let mut state = TimeBoxState::new(hash);
        state.open_segment(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        state
    }

    #[test]
    fn test_state_for_returns_existing_or_fresh() {
        let store = Arc::new(InMemoryStateStore::new());
        store.save(&[started("known")]).unwrap();
        let tracker = TaskTracker::open(store).unwrap();

        assert!(tracker.state_for("known").is_active());
        let fresh = tracker.state_for("new");
        assert_eq!(fresh.task_hash, "new");
        assert!(fresh.segments.is_empty());
    }

    #[test]
    fn test_record_and_finish_persist() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileStateStore::new(temp.path().join("state.json")));
        let mut tracker = TaskTracker::open(store.clone()).unwrap();

        tracker.record(started("a")).unwrap();
        tracker.record(started("b")).unwrap();
        tracker.record(started("a")).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);

        tracker.finish("a").unwrap();
        let persisted = store.load().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].task_hash, "b");
        assert_eq!(tracker.states(), persisted.as_slice());
    }

    #[test]
    fn test_next_task_skips_checked_and_untimed() {
        let entries = scan_tasks(
            "- [x] Done @5m\n- [ ] No timebox\n- [ ] Write docs @1h\n- [ ] Review @30m\n",
        );
        assert_eq!(
            next_task(&entries, None).unwrap().task.description,
            "Write docs"
        );
        assert_eq!(
            next_task(&entries, Some("rev")).unwrap().task.description,
            "Review"
        );
        assert!(next_task(&entries, Some("done")).is_none());
    }

    #[test]
    fn test_complete_in_file_rewrites_and_drops_entry() {
        let temp = TempDir::new().unwrap();
        let doc = temp.path().join("todo.md");
        std::fs::write(&doc, "- [ ] Buy milk @10m\n- [ ] Call Bob @20m\n").unwrap();

        let hash = task_hash("Buy milk", "@10m");
        let mut tracker = TaskTracker::open(Arc::new(InMemoryStateStore::new())).unwrap();
        tracker.record(started(&hash)).unwrap();

        let completion = Completion {
            task_hash: hash.clone(),
            elapsed: Duration::from_secs(582),
            commits: vec![],
        };
        complete_in_file(&mut tracker, &doc, &completion).unwrap();

        let content = std::fs::read_to_string(&doc).unwrap();
        assert_eq!(
            content,
            "- [x] Buy milk @10m  ⏱️ 0h 9m 42s\n- [ ] Call Bob @20m\n"
        );
        assert!(tracker.states().is_empty());
    }

    #[test]
    fn test_complete_in_file_missing_task_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let doc = temp.path().join("todo.md");
        let original = "- [ ] Renamed task @10m\n";
        std::fs::write(&doc, original).unwrap();

        let hash = task_hash("Buy milk", "@10m");
        let mut tracker = TaskTracker::open(Arc::new(InMemoryStateStore::new())).unwrap();
        tracker.record(started(&hash)).unwrap();

        let completion = Completion {
            task_hash: hash.clone(),
            elapsed: Duration::from_secs(60),
            commits: vec![],
        };
        let err = complete_in_file(&mut tracker, &doc, &completion).unwrap_err();
        assert!(err.is_task_missing());
        assert_eq!(std::fs::read_to_string(&doc).unwrap(), original);
        assert_eq!(tracker.states().len(), 1);
    }

    #[test]
    fn test_load_tasks_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = load_tasks(&temp.path().join("nope.md")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
