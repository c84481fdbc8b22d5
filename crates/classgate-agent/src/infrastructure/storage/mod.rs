//! Storage infrastructure: configuration and runtime-state persistence.
//!
//! - `config` reads and writes the TOML [`AppConfig`](config::AppConfig),
//!   including the user's `[settings]` table, and serves those settings to the
//!   controller through [`TomlSettingsStore`](config::TomlSettingsStore).
//! - `state` keeps the controller's cached windows and sync status in a JSON
//!   document.
//!
//! Files the agent owns are replaced atomically with [`write_atomic`], so a
//! crash mid-write never leaves a truncated document behind.

pub mod config;
pub mod state;

use std::path::{Path, PathBuf};

/// Writes `contents` to a sibling temp file and renames it over `path`.
///
/// Parent directories are created as needed.
///
/// # Errors
///
/// Returns the underlying I/O error from any step.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Blocking counterpart of [`write_atomic`] for callers outside a runtime.
///
/// # Errors
///
/// Returns the underlying I/O error from any step.
pub fn write_atomic_blocking(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
