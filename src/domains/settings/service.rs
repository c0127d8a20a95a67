use super::types::{BackendChoice, KeeperSettings, default_settings_path};
use crate::errors::SessionError;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "PANE_KEEPER_CONFIG";
pub const ENV_SOCKET_DIR: &str = "PANE_KEEPER_SOCKET_DIR";
pub const ENV_TMUX_CONFIG: &str = "PANE_KEEPER_TMUX_CONFIG";
pub const ENV_CHECKPOINT: &str = "PANE_KEEPER_CHECKPOINT";
pub const ENV_TMUX_BIN: &str = "PANE_KEEPER_TMUX_BIN";
pub const ENV_ZMX_BIN: &str = "PANE_KEEPER_ZMX_BIN";
pub const ENV_BACKEND: &str = "PANE_KEEPER_BACKEND";

/// Loads [`KeeperSettings`] from TOML and layers environment overrides on top.
pub struct SettingsService {
    path: Option<PathBuf>,
}

impl SettingsService {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Settings file from `PANE_KEEPER_CONFIG`, else the per-user config dir.
    pub fn from_env() -> Self {
        let path = env_path(ENV_CONFIG_PATH).or_else(default_settings_path);
        Self::new(path)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load(&self) -> Result<KeeperSettings, SessionError> {
        let mut settings = match &self.path {
            Some(path) => load_file(path)?,
            None => KeeperSettings::default(),
        };
        apply_env_overrides(&mut settings)?;
        Ok(settings)
    }

    pub fn save(&self, settings: &KeeperSettings) -> Result<(), SessionError> {
        let Some(path) = &self.path else {
            return Err(SessionError::config("path", "no settings path configured"));
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SessionError::io("create_settings_dir", parent.display(), e))?;
        }
        let body = toml::to_string_pretty(settings)
            .map_err(|e| SessionError::config("settings", e))?;
        fs::write(path, body).map_err(|e| SessionError::io("write_settings", path.display(), e))
    }
}

fn load_file(path: &Path) -> Result<KeeperSettings, SessionError> {
    if !path.exists() {
        debug!("No settings file at {}, using defaults", path.display());
        return Ok(KeeperSettings::default());
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| SessionError::io("read_settings", path.display(), e))?;
    let settings: KeeperSettings = toml::from_str(&raw).map_err(|e| {
        warn!("Failed to parse settings at {}: {e}", path.display());
        SessionError::config("settings", e)
    })?;
    info!("Loaded settings from {}", path.display());
    Ok(settings)
}

pub fn apply_env_overrides(settings: &mut KeeperSettings) -> Result<(), SessionError> {
    if let Some(dir) = env_path(ENV_SOCKET_DIR) {
        settings.socket_dir = Some(dir);
    }
    if let Some(config) = env_path(ENV_TMUX_CONFIG) {
        settings.tmux.config_path = Some(config);
    }
    if let Some(checkpoint) = env_path(ENV_CHECKPOINT) {
        settings.checkpoint_path = Some(checkpoint);
    }
    if let Some(binary) = env_path(ENV_TMUX_BIN) {
        settings.tmux.binary = Some(binary);
    }
    if let Some(binary) = env_path(ENV_ZMX_BIN) {
        settings.zmx.binary = Some(binary);
    }
    if let Some(choice) = env_value(ENV_BACKEND) {
        settings.backend = parse_backend_choice(&choice)?;
    }
    Ok(())
}

pub fn parse_backend_choice(value: &str) -> Result<BackendChoice, SessionError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(BackendChoice::Auto),
        "tmux" => Ok(BackendChoice::Tmux),
        "zmx" => Ok(BackendChoice::Zmx),
        other => Err(SessionError::config(
            "backend",
            format!("unknown backend '{other}' (expected auto, tmux or zmx)"),
        )),
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_value(key).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::env_adapter::EnvAdapter;
    use serial_test::serial;
    use tempfile::TempDir;

    const ALL_VARS: &[&str] = &[
        ENV_SOCKET_DIR,
        ENV_TMUX_CONFIG,
        ENV_CHECKPOINT,
        ENV_TMUX_BIN,
        ENV_ZMX_BIN,
        ENV_BACKEND,
    ];

    fn clear_env() {
        for key in ALL_VARS {
            EnvAdapter::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn missing_file_yields_defaults() {
        clear_env();
        let temp = TempDir::new().unwrap();
        let service = SettingsService::new(Some(temp.path().join("config.toml")));
        assert_eq!(service.load().unwrap(), KeeperSettings::default());
    }

    #[test]
    #[serial]
    fn partial_file_keeps_remaining_defaults() {
        clear_env();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "backend = \"zmx\"\nhealth_check_interval_secs = 10\n\n[tmux]\nsocket_name = \"custom\"\n",
        )
        .unwrap();

        let settings = SettingsService::new(Some(path)).load().unwrap();
        assert_eq!(settings.backend, BackendChoice::Zmx);
        assert_eq!(settings.health_check_interval_secs, 10);
        assert_eq!(settings.tmux.socket_name, "custom");
        assert_eq!(settings.creation_retries, 3);
    }

    #[test]
    #[serial]
    fn invalid_file_is_a_config_error() {
        clear_env();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "backend = [").unwrap();

        let err = SettingsService::new(Some(path)).load().unwrap_err();
        assert!(matches!(err, SessionError::ConfigError { .. }));
    }

    #[test]
    #[serial]
    fn env_overrides_win_over_file() {
        clear_env();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "socket_dir = \"/from/file\"\n").unwrap();

        let settings = {
            let _socket = EnvAdapter::scoped(ENV_SOCKET_DIR, "/from/env");
            let _config = EnvAdapter::scoped(ENV_TMUX_CONFIG, "/etc/pk-tmux.conf");
            let _backend = EnvAdapter::scoped(ENV_BACKEND, "TMUX");
            SettingsService::new(Some(path)).load().unwrap()
        };
        assert!(std::env::var(ENV_BACKEND).is_err());

        assert_eq!(settings.socket_dir, Some(PathBuf::from("/from/env")));
        assert_eq!(
            settings.tmux.config_path,
            Some(PathBuf::from("/etc/pk-tmux.conf"))
        );
        assert_eq!(settings.backend, BackendChoice::Tmux);
    }

    #[test]
    #[serial]
    fn unknown_backend_override_is_rejected() {
        clear_env();
        let result = {
            let _backend = EnvAdapter::scoped(ENV_BACKEND, "screen");
            SettingsService::new(None).load()
        };
        assert!(matches!(result, Err(SessionError::ConfigError { .. })));
    }

    #[test]
    #[serial]
    fn save_then_load_preserves_values() {
        clear_env();
        let temp = TempDir::new().unwrap();
        let service = SettingsService::new(Some(temp.path().join("nested/config.toml")));
        let settings = KeeperSettings {
            backend: BackendChoice::Tmux,
            command_timeout_secs: 9,
            auto_recover: false,
            ..KeeperSettings::default()
        };
        service.save(&settings).unwrap();
        assert_eq!(service.load().unwrap(), settings);
    }
}
