//! Configuration resolution for labkit.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/labkit/settings.json)
//! 3. Project config (.labkit/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete labkit configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the loop that drives `poll()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriverConfig {
    /// Spacing between poll ticks (milliseconds).
    pub poll_interval_ms: u64,
    /// How often outstanding work is reported (seconds).
    pub progress_interval_secs: u64,
    /// Overall time limit for a run (seconds). `None` waits forever.
    pub time_limit_secs: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            progress_interval_secs: 30,
            time_limit_secs: None,
        }
    }
}

impl DriverConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs)
    }
}

/// Settings for running commands on lab machines over ssh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Path to the `ssh` binary.
    pub ssh_bin: PathBuf,
    /// Extra options passed before the host name.
    pub ssh_options: Vec<String>,
    /// Login user; `None` uses the ssh default.
    pub user: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_bin: PathBuf::from("ssh"),
            ssh_options: vec![
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                "ConnectTimeout=10".to_string(),
            ],
            user: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = load_config_files(global_config_path().as_deref(), project_dir)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Merge the global and project settings files over the defaults.
///
/// Missing files are skipped; unreadable or malformed files are errors.
pub fn load_config_files(global_path: Option<&Path>, project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_path
        && global_path.exists()
    {
        let global = load_config_file(global_path)?;
        merge_config(&mut config, global);
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".labkit").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("labkit").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.driver.poll_interval_ms = overlay.driver.poll_interval_ms;
    base.driver.progress_interval_secs = overlay.driver.progress_interval_secs;
    if overlay.driver.time_limit_secs.is_some() {
        base.driver.time_limit_secs = overlay.driver.time_limit_secs;
    }

    base.remote.ssh_bin = overlay.remote.ssh_bin;
    base.remote.ssh_options = overlay.remote.ssh_options;
    if overlay.remote.user.is_some() {
        base.remote.user = overlay.remote.user;
    }

    base.logging = overlay.logging;
}

/// Apply `LABKIT_*` overrides read through `lookup`.
///
/// Values that fail to parse are ignored with a warning.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("LABKIT_POLL_INTERVAL_MS") {
        match val.parse() {
            Ok(n) => config.driver.poll_interval_ms = n,
            Err(_) => tracing::warn!(value = %val, "Ignoring invalid LABKIT_POLL_INTERVAL_MS"),
        }
    }
    if let Some(val) = lookup("LABKIT_PROGRESS_INTERVAL") {
        match val.parse() {
            Ok(n) => config.driver.progress_interval_secs = n,
            Err(_) => tracing::warn!(value = %val, "Ignoring invalid LABKIT_PROGRESS_INTERVAL"),
        }
    }
    if let Some(val) = lookup("LABKIT_TIME_LIMIT") {
        match val.parse() {
            Ok(n) => config.driver.time_limit_secs = Some(n),
            Err(_) => tracing::warn!(value = %val, "Ignoring invalid LABKIT_TIME_LIMIT"),
        }
    }
    if let Some(val) = lookup("LABKIT_SSH_BIN") {
        config.remote.ssh_bin = PathBuf::from(val);
    }
    if let Some(val) = lookup("LABKIT_SSH_USER") {
        config.remote.user = Some(val);
    }
    if let Some(val) = lookup("LABKIT_LOG_LEVEL") {
        config.logging.level = val;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_settings(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("settings.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn default_config_polls_four_times_a_second() {
        let config = Config::default();
        assert_eq!(config.driver.poll_interval(), Duration::from_millis(250));
        assert!(config.driver.time_limit().is_none());
    }

    #[test]
    fn default_ssh_is_non_interactive() {
        let config = Config::default();
        assert!(config.remote.ssh_options.contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn missing_files_yield_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config =
            load_config_files(Some(&dir.path().join("absent.json")), Some(dir.path())).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn project_overrides_global() {
        let global_dir = tempfile::TempDir::new().unwrap();
        let global = write_settings(
            global_dir.path(),
            r#"{"driver": {"poll_interval_ms": 100, "time_limit_secs": 60}}"#,
        );

        let project = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(project.path().join(".labkit")).unwrap();
        write_settings(
            &project.path().join(".labkit"),
            r#"{"driver": {"poll_interval_ms": 50}, "remote": {"user": "lab"}}"#,
        );

        let config = load_config_files(Some(&global), Some(project.path())).unwrap();
        assert_eq!(config.driver.poll_interval_ms, 50);
        // Unset optional values in the overlay keep the global value.
        assert_eq!(config.driver.time_limit_secs, Some(60));
        assert_eq!(config.remote.user.as_deref(), Some("lab"));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_settings(dir.path(), "{ not json");
        let err = load_config_files(Some(&path), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LABKIT_POLL_INTERVAL_MS", "not-a-number"),
            ("LABKIT_TIME_LIMIT", "90"),
            ("LABKIT_SSH_BIN", "/usr/local/bin/ssh"),
            ("LABKIT_LOG_LEVEL", "debug"),
        ]);
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(ToString::to_string));

        assert_eq!(config.driver.poll_interval_ms, 250);
        assert_eq!(config.driver.time_limit_secs, Some(90));
        assert_eq!(config.remote.ssh_bin, PathBuf::from("/usr/local/bin/ssh"));
        assert_eq!(config.logging.level, "debug");
    }
}
