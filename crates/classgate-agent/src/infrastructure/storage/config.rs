//! TOML-based configuration persistence for the agent.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Classgate\config.toml`
//! - Linux:    `~/.config/classgate/config.toml`
//! - macOS:    `~/Library/Application Support/Classgate/config.toml`
//!
//! # What is in the file? (for beginners)
//!
//! ```toml
//! [agent]
//! log_level = "info"
//! periodic_sync_minutes = 5
//! dns_flush_commands = [["resolvectl", "flush-caches"]]
//!
//! [settings]
//! blocked_domains = ["youtube.com", "reddit.com", "x.com"]
//! allowed_domains = ["docs.google.com"]
//! selected_calendar_id = "classes"
//!
//! [paths]
//! calendar_dir = "calendars"
//! hosts_file = "/etc/hosts"
//! ```
//!
//! Every field has a serde default, so the agent runs on first start (before
//! a config file exists) and keeps working when an older file lacks newer
//! fields.  Relative paths in `[paths]` are resolved against the directory
//! holding the config file.
//!
//! The `[settings]` table is the user's half of the agent's state.  The CLI
//! edits it with [`save_config_to`]; the daemon reads it through
//! [`TomlSettingsStore`] on every pass, so edits take effect without a
//! restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::write_atomic_blocking;
use crate::application::reconcile::ReconcileConfig;
use crate::application::state::{Settings, SettingsStore, StoreError};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Daemon behaviour and timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Minutes between periodic calendar syncs, at most one day.
    #[serde(default = "default_periodic_sync_minutes")]
    pub periodic_sync_minutes: u64,
    /// Seconds added after each class boundary before re-deciding.
    #[serde(default = "default_boundary_slack_seconds")]
    pub boundary_slack_seconds: u64,
    /// Days of events fetched ahead of now.
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: u64,
    /// Minutes of events fetched behind now.
    #[serde(default = "default_lookbehind_minutes")]
    pub lookbehind_minutes: u64,
    /// Seconds between checks of the config file for settings changes.
    #[serde(default = "default_settings_poll_seconds")]
    pub settings_poll_seconds: u64,
    /// Commands run after the hosts file changes, to drop cached lookups.
    #[serde(default = "default_dns_flush_commands")]
    pub dns_flush_commands: Vec<Vec<String>>,
}

/// File locations.  Relative paths are resolved against the config directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_calendar_dir")]
    pub calendar_dir: PathBuf,
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,
    /// Hosts file to enforce blocking in; disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts_file: Option<PathBuf>,
    /// Request file through which CLI commands reach the daemon.
    #[serde(default = "default_control_file")]
    pub control_file: PathBuf,
}

/// [`PathsConfig`] with every path made absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub state_file: PathBuf,
    pub calendar_dir: PathBuf,
    pub rules_file: PathBuf,
    pub hosts_file: Option<PathBuf>,
    pub control_file: PathBuf,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_periodic_sync_minutes() -> u64 {
    5
}
fn default_boundary_slack_seconds() -> u64 {
    5
}
fn default_lookahead_days() -> u64 {
    7
}
fn default_lookbehind_minutes() -> u64 {
    10
}
fn default_settings_poll_seconds() -> u64 {
    2
}
fn default_dns_flush_commands() -> Vec<Vec<String>> {
    let commands: &[&[&str]] = if cfg!(target_os = "macos") {
        &[
            &["/usr/bin/dscacheutil", "-flushcache"],
            &["/usr/bin/killall", "-HUP", "mDNSResponder"],
        ]
    } else if cfg!(target_os = "windows") {
        &[&["ipconfig", "/flushdns"]]
    } else {
        &[]
    };
    commands
        .iter()
        .map(|c| c.iter().map(|s| s.to_string()).collect())
        .collect()
}
fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}
fn default_calendar_dir() -> PathBuf {
    PathBuf::from("calendars")
}
fn default_rules_file() -> PathBuf {
    PathBuf::from("rules.json")
}
fn default_control_file() -> PathBuf {
    PathBuf::from("control.json")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            periodic_sync_minutes: default_periodic_sync_minutes(),
            boundary_slack_seconds: default_boundary_slack_seconds(),
            lookahead_days: default_lookahead_days(),
            lookbehind_minutes: default_lookbehind_minutes(),
            settings_poll_seconds: default_settings_poll_seconds(),
            dns_flush_commands: default_dns_flush_commands(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            calendar_dir: default_calendar_dir(),
            rules_file: default_rules_file(),
            hosts_file: None,
            control_file: default_control_file(),
        }
    }
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const MAX_PERIODIC_SYNC_MINUTES: u64 = 24 * 60;

impl AgentConfig {
    /// Controller timings derived from this section.
    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            periodic_sync: Duration::from_secs(
                self.periodic_sync_minutes
                    .clamp(1, MAX_PERIODIC_SYNC_MINUTES)
                    .saturating_mul(60),
            ),
            boundary_slack: Duration::from_secs(self.boundary_slack_seconds),
            lookahead: Duration::from_secs(self.lookahead_days.saturating_mul(SECS_PER_DAY)),
            lookbehind: Duration::from_secs(self.lookbehind_minutes.saturating_mul(60)),
        }
    }

    pub fn settings_poll_interval(&self) -> Duration {
        Duration::from_secs(self.settings_poll_seconds.clamp(1, 60 * 60))
    }
}

impl PathsConfig {
    /// Resolves relative paths against `base`.
    pub fn resolve(&self, base: &Path) -> ResolvedPaths {
        let abs = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        ResolvedPaths {
            state_file: abs(&self.state_file),
            calendar_dir: abs(&self.calendar_dir),
            rules_file: abs(&self.rules_file),
            hosts_file: self.hosts_file.as_deref().map(abs),
            control_file: abs(&self.control_file),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no config at {}; using defaults", path.display());
            Ok(AppConfig::default())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating the directory if needed.
///
/// The file is replaced atomically, so a daemon polling it never reads a
/// half-written document.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    write_atomic_blocking(path, content.as_bytes()).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `Classgate`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Classgate"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("classgate"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Classgate")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Settings store ────────────────────────────────────────────────────────────

/// [`SettingsStore`] backed by the `[settings]` table of a config file.
///
/// The file is re-read on every call so CLI edits are picked up by a running
/// daemon.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for TomlSettingsStore {
    async fn settings(&self) -> Result<Settings, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => toml::from_str::<AppConfig>(&content)
                .map(|cfg| cfg.settings)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(e) => Err(StoreError::Io(format!("{}: {e}", self.path.display()))),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("classgate_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    // ── AppConfig defaults ────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_has_expected_timings() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.agent.periodic_sync_minutes, 5);
        assert_eq!(cfg.agent.boundary_slack_seconds, 5);
        assert_eq!(cfg.agent.lookahead_days, 7);
        assert_eq!(cfg.agent.lookbehind_minutes, 10);
        assert_eq!(cfg.agent.log_level, "info");
    }

    #[test]
    fn test_reconcile_config_matches_controller_defaults() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.reconcile_config(), ReconcileConfig::default());
    }

    #[test]
    fn test_reconcile_config_saturates_absurd_values() {
        // Arrange
        let cfg = AgentConfig {
            periodic_sync_minutes: u64::MAX,
            lookahead_days: u64::MAX,
            lookbehind_minutes: u64::MAX,
            ..AgentConfig::default()
        };

        // Act
        let timings = cfg.reconcile_config();

        // Assert
        assert_eq!(timings.periodic_sync, Duration::from_secs(SECS_PER_DAY));
        assert_eq!(timings.lookahead, Duration::from_secs(u64::MAX));
        assert_eq!(timings.lookbehind, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_app_config_default_settings_block_common_sites() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.settings.blocked_domains.len(), 3);
        assert!(cfg.settings.selected_calendar_id.is_none());
        assert!(cfg.paths.hosts_file.is_none());
    }

    // ── TOML parsing ──────────────────────────────────────────────────────────

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_settings_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[settings]
allowed_domains = ["docs.google.com"]
selected_calendar_id = "classes"

[agent]
boundary_slack_seconds = 2
dns_flush_commands = [["resolvectl", "flush-caches"]]
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.settings.allowed_domains, vec!["docs.google.com"]);
        assert_eq!(cfg.settings.selected_calendar_id.as_deref(), Some("classes"));
        // Unspecified fields keep their defaults
        assert_eq!(cfg.settings.blocked_domains.len(), 3);
        assert_eq!(cfg.agent.boundary_slack_seconds, 2);
        assert_eq!(cfg.agent.periodic_sync_minutes, 5);
        assert_eq!(
            cfg.agent.dns_flush_commands,
            vec![vec!["resolvectl".to_string(), "flush-caches".to_string()]]
        );
    }

    #[test]
    fn test_unset_calendar_and_hosts_file_are_omitted() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        assert!(!toml_str.contains("selected_calendar_id"));
        assert!(!toml_str.contains("hosts_file"));
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    // ── Paths ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let paths = PathsConfig {
            hosts_file: Some(PathBuf::from("/etc/hosts")),
            ..PathsConfig::default()
        };
        let resolved = paths.resolve(Path::new("/home/u/.config/classgate"));
        assert_eq!(
            resolved.state_file,
            PathBuf::from("/home/u/.config/classgate/state.json")
        );
        assert_eq!(
            resolved.calendar_dir,
            PathBuf::from("/home/u/.config/classgate/calendars")
        );
        assert_eq!(resolved.hosts_file, Some(PathBuf::from("/etc/hosts")));
        assert_eq!(
            resolved.control_file,
            PathBuf::from("/home/u/.config/classgate/control.json")
        );
    }

    // ── Load / save ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("sub").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.settings.blocked_domains.push("*.tiktok.com".to_string());
        cfg.settings.selected_calendar_id = Some("classes".to_string());
        cfg.agent.log_level = "debug".to_string();

        // Act
        save_config_to(&path, &cfg).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_config_replaces_file_without_leaving_temp_file() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[settings]\nblocked_domains = [\"old.com\"]\n").unwrap();
        let mut cfg = AppConfig::default();
        cfg.settings.blocked_domains = vec!["new.com".to_string()];

        // Act
        save_config_to(&path, &cfg).unwrap();

        // Assert
        assert_eq!(load_config_from(&path).unwrap(), cfg);
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "config.toml")
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_from_malformed_file_is_parse_error() {
        let dir = temp_dir();
        let path = dir.join("config.toml");
        std::fs::write(&path, "settings = [").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
        // NoPlatformConfigDir is acceptable in a stripped environment.
    }

    // ── TomlSettingsStore ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_settings_store_sees_edits_without_restart() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("config.toml");
        let store = TomlSettingsStore::new(&path);
        assert_eq!(store.settings().await.unwrap(), Settings::default());

        // Act
        let mut cfg = AppConfig::default();
        cfg.settings.blocked_domains = vec!["news.ycombinator.com".to_string()];
        save_config_to(&path, &cfg).unwrap();

        // Assert
        let settings = store.settings().await.unwrap();
        assert_eq!(settings.blocked_domains, vec!["news.ycombinator.com"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_settings_store_reports_corrupt_file() {
        let dir = temp_dir();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[settings\nblocked_domains = 1").unwrap();

        let result = TomlSettingsStore::new(&path).settings().await;

        assert!(matches!(result, Err(StoreError::Corrupt(_))));
        std::fs::remove_dir_all(&dir).ok();
    }
}
