use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const APP_DIR_NAME: &str = "pane-keeper";
pub const CHECKPOINT_FILE_NAME: &str = "session-checkpoint.json";
pub const DEFAULT_TMUX_SOCKET_NAME: &str = "pane-keeper";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Prefer tmux, fall back to zmx when tmux is missing.
    #[default]
    Auto,
    Tmux,
    Zmx,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TmuxSettings {
    pub binary: Option<PathBuf>,
    pub socket_name: String,
    pub config_path: Option<PathBuf>,
}

impl Default for TmuxSettings {
    fn default() -> Self {
        Self {
            binary: None,
            socket_name: DEFAULT_TMUX_SOCKET_NAME.to_string(),
            config_path: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ZmxSettings {
    pub binary: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct KeeperSettings {
    pub backend: BackendChoice,
    pub tmux: TmuxSettings,
    pub zmx: ZmxSettings,
    /// Directory holding the multiplexer's socket; exported to every child process.
    pub socket_dir: Option<PathBuf>,
    pub checkpoint_path: Option<PathBuf>,
    pub health_check_interval_secs: u64,
    pub checkpoint_max_age_hours: u64,
    pub command_timeout_secs: u64,
    pub creation_retries: u32,
    pub recovery_attempts: u32,
    pub auto_recover: bool,
    pub max_queue_depth: usize,
}

impl Default for KeeperSettings {
    fn default() -> Self {
        Self {
            backend: BackendChoice::default(),
            tmux: TmuxSettings::default(),
            zmx: ZmxSettings::default(),
            socket_dir: None,
            checkpoint_path: None,
            health_check_interval_secs: 30,
            checkpoint_max_age_hours: 24 * 7,
            command_timeout_secs: 5,
            creation_retries: 3,
            recovery_attempts: 3,
            auto_recover: true,
            max_queue_depth: 32,
        }
    }
}

impl KeeperSettings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn checkpoint_max_age(&self) -> chrono::Duration {
        i64::try_from(self.checkpoint_max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.checkpoint_path
            .clone()
            .unwrap_or_else(default_checkpoint_path)
    }
}

pub fn default_checkpoint_path() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join(CHECKPOINT_FILE_NAME)
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_age_is_one_week() {
        assert_eq!(
            KeeperSettings::default().checkpoint_max_age(),
            chrono::Duration::days(7)
        );
    }

    #[test]
    fn huge_max_age_saturates_instead_of_wrapping() {
        for hours in [u64::MAX, i64::MAX as u64, (i64::MAX / 3600) as u64 + 1] {
            let settings = KeeperSettings {
                checkpoint_max_age_hours: hours,
                ..KeeperSettings::default()
            };
            assert_eq!(settings.checkpoint_max_age(), chrono::Duration::MAX);
        }
    }
}
