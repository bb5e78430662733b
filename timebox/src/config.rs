// Environment configuration helpers
// Handles the ledger location and the session/poll intervals

use std::path::PathBuf;
use std::time::Duration;

/// Default interval between commit polls
pub const DEFAULT_GIT_POLL: Duration = Duration::from_secs(5);

/// Session tick interval
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the timebox driver
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the persisted ledger (state.json)
    pub state_dir: PathBuf,
    /// How often the commit watcher queries git
    pub git_poll_interval: Duration,
    /// Whether commits are collected at all
    pub git_enabled: bool,
    pub tick_interval: Duration,
}

impl Config {
    /// Create configuration using default paths
    pub fn default_paths() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            git_poll_interval: DEFAULT_GIT_POLL,
            git_enabled: true,
            tick_interval: TICK_INTERVAL,
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default_paths();

        // TIMEBOX_DIR overrides the state directory
        if let Ok(dir) = std::env::var("TIMEBOX_DIR") {
            if !dir.trim().is_empty() {
                config.state_dir = PathBuf::from(dir);
            }
        }

        if let Ok(secs) = std::env::var("TIMEBOX_GIT_POLL_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.git_poll_interval = Duration::from_secs(secs),
                _ => log::warn!("Ignoring invalid TIMEBOX_GIT_POLL_SECS={:?}", secs),
            }
        }

        if let Ok(flag) = std::env::var("TIMEBOX_NO_GIT") {
            config.git_enabled = !(flag == "1" || flag.eq_ignore_ascii_case("true"));
        }

        config
    }

    /// Get the default state directory
    fn default_state_dir() -> PathBuf {
        // ~/.timebox/ (or the temp dir if home is unavailable)
        dirs::home_dir()
            .map(|h| h.join(".timebox"))
            .unwrap_or_else(|| std::env::temp_dir().join("timebox"))
    }

    /// Get the state directory
    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// Get the ledger file path
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    /// Sidecar file locked while the ledger is being replaced
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("state.json.lock")
    }

    /// Ensure the state directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)
    }
}
