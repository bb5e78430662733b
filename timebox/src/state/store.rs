// Persistence for the ledger
// The ledger is saved to <state_dir>/state.json with file locking and an
// atomic temp-file + rename replace

use super::TimeBoxState;
use crate::config::Config;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Load/save contract shared by the file-backed and in-memory stores
pub trait StateStore: Send + Sync {
    /// The full persisted list, empty if nothing was saved yet
    fn load(&self) -> Result<Vec<TimeBoxState>, StateError>;

    /// Replace the persisted list
    fn save(&self, states: &[TimeBoxState]) -> Result<(), StateError>;

    /// A copy of `states` without the entry for `task_hash`
    fn remove_task_state(&self, states: &[TimeBoxState], task_hash: &str) -> Vec<TimeBoxState> {
        remove_task_state(states, task_hash)
    }
}

/// A copy of `states` without the entry for `task_hash`
pub fn remove_task_state(states: &[TimeBoxState], task_hash: &str) -> Vec<TimeBoxState> {
    states
        .iter()
        .filter(|s| s.task_hash != task_hash)
        .cloned()
        .collect()
}

/// Ledger stored as pretty JSON on disk
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self { path, lock_path }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            path: config.state_file(),
            lock_path: config.lock_file(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move an unreadable ledger aside so the next save cannot clobber it
    fn quarantine(&self, reason: &serde_json::Error) {
        let stamp = chrono::Utc::now().timestamp();
        let target = self.path.with_file_name(format!(
            "{}.corrupt-{}",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("state.json"),
            stamp
        ));
        match fs::rename(&self.path, &target) {
            Ok(()) => log::warn!(
                "Ledger {} is malformed ({}); moved to {} and starting empty",
                self.path.display(),
                reason,
                target.display()
            ),
            Err(e) => log::warn!(
                "Ledger {} is malformed ({}) and could not be moved aside: {}",
                self.path.display(),
                reason,
                e
            ),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Vec<TimeBoxState>, StateError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Option<Vec<TimeBoxState>>>(&contents) {
            Ok(states) => {
                let states = states.unwrap_or_default();
                log::debug!(
                    "Loaded {} ledger entries from {}",
                    states.len(),
                    self.path.display()
                );
                Ok(states)
            }
            Err(e) => {
                self.quarantine(&e);
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, states: &[TimeBoxState]) -> Result<(), StateError> {
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| StateError::Write { path, source }
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err(parent))?;
        }

        let contents = serde_json::to_string_pretty(states)?;

        // Serialize writers across processes; the lock is released when the file drops
        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(write_err(&self.lock_path))?;
        lock.lock_exclusive().map_err(write_err(&self.lock_path))?;

        atomic_write(&self.path, &contents).map_err(write_err(&self.path))?;
        log::debug!(
            "Saved {} ledger entries to {}",
            states.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state.json");
    path.with_file_name(format!("{}.lock", name))
}

/// Ledger kept only in memory
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: Mutex<Vec<TimeBoxState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self) -> Result<Vec<TimeBoxState>, StateError> {
        let states = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(states.clone())
    }

    fn save(&self, states: &[TimeBoxState]) -> Result<(), StateError> {
        let mut stored = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stored = states.to_vec();
        Ok(())
    }
}

/// Atomically save data to a file using write-to-temp + fsync + rename
///
/// The previous file stays untouched if any step fails.
pub fn atomic_write(path: &Path, contents: &str) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    // Create temp file in same directory to ensure same filesystem for rename
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown"),
        std::process::id()
    ));

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
