//! Settings and runtime-state records, and the store ports that hold them.
//!
//! Two stores are involved:
//!
//! - The **settings store** holds what the user chose: blocked and allowed
//!   destinations and the calendar to follow.  The controller only reads it.
//! - The **runtime-state store** holds what the controller derived: the cached
//!   class windows, the calendar's time zone, and the outcome of the last
//!   sync.  The controller is its only writer.
//!
//! Runtime-state writes are expressed as a [`RuntimeStatePatch`] so a failed
//! sync can update its timestamp and error without touching cached windows.

use async_trait::async_trait;
use classgate_core::TimeWindow;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing medium could not be read or written.
    #[error("store I/O failed: {0}")]
    Io(String),

    /// Stored content could not be decoded.
    #[error("store content is corrupt: {0}")]
    Corrupt(String),
}

/// Destinations shipped as the blocked list on first run.
pub const DEFAULT_BLOCKED_DOMAINS: [&str; 3] = ["youtube.com", "reddit.com", "x.com"];

/// User-maintained settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_blocked_domains")]
    pub blocked_domains: Vec<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_calendar_id: Option<String>,
}

fn default_blocked_domains() -> Vec<String> {
    DEFAULT_BLOCKED_DOMAINS.iter().map(|d| d.to_string()).collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            blocked_domains: default_blocked_domains(),
            allowed_domains: Vec::new(),
            selected_calendar_id: None,
        }
    }
}

/// State derived by the controller and cached between passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeState {
    /// Canonical class windows from the last successful sync.
    pub cached_class_windows: Vec<TimeWindow>,
    /// Time zone reported by the calendar, if any.
    pub calendar_time_zone: Option<String>,
    /// Epoch milliseconds of the last sync attempt.
    pub last_calendar_sync_at: Option<i64>,
    /// User-facing message describing why the last sync failed.
    pub last_calendar_sync_error: Option<String>,
}

/// A partial update to [`RuntimeState`].
///
/// `None` leaves a field untouched; `Some(value)` overwrites it.  Nullable
/// fields therefore use `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeStatePatch {
    pub cached_class_windows: Option<Vec<TimeWindow>>,
    pub calendar_time_zone: Option<Option<String>>,
    pub last_calendar_sync_at: Option<i64>,
    pub last_calendar_sync_error: Option<Option<String>>,
}

impl RuntimeStatePatch {
    /// Writes every field present in the patch into `state`.
    pub fn apply_to(self, state: &mut RuntimeState) {
        if let Some(windows) = self.cached_class_windows {
            state.cached_class_windows = windows;
        }
        if let Some(tz) = self.calendar_time_zone {
            state.calendar_time_zone = tz;
        }
        if let Some(at) = self.last_calendar_sync_at {
            state.last_calendar_sync_at = Some(at);
        }
        if let Some(err) = self.last_calendar_sync_error {
            state.last_calendar_sync_error = err;
        }
    }
}

/// Read access to the user's settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns the current settings, falling back to defaults when none exist.
    async fn settings(&self) -> Result<Settings, StoreError>;
}

/// Read/write access to the runtime state.
#[async_trait]
pub trait RuntimeStateStore: Send + Sync {
    /// Returns the current runtime state, or the default when none exists.
    async fn runtime_state(&self) -> Result<RuntimeState, StoreError>;

    /// Merges `patch` into the stored state.
    async fn patch_runtime_state(&self, patch: RuntimeStatePatch) -> Result<(), StoreError>;
}
