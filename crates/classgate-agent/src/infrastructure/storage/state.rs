//! JSON-file runtime-state store.
//!
//! The document mirrors [`RuntimeState`]:
//!
//! ```json
//! {
//!   "cachedClassWindows": [{ "startMs": 1700000000000, "endMs": 1700003600000 }],
//!   "calendarTimeZone": "Europe/Madrid",
//!   "lastCalendarSyncAt": 1700000000000,
//!   "lastCalendarSyncError": null
//! }
//! ```
//!
//! Writes go through a read-patch-write cycle under an async mutex and land
//! atomically.  A window list that is not canonical on load (hand-edited, or
//! written by an older build) is repaired in memory with a warning.  A
//! document that does not parse at all reads as the default state and is
//! replaced by the next write.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use classgate_core::{canonicalize, validate_canonical};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::write_atomic;
use crate::application::state::{RuntimeState, RuntimeStatePatch, RuntimeStateStore, StoreError};

/// [`RuntimeStateStore`] persisted as a JSON document.
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<RuntimeState, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RuntimeState::default())
            }
            Err(e) => return Err(StoreError::Io(format!("{}: {e}", self.path.display()))),
        };
        let mut state: RuntimeState = match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "unreadable runtime state in {} ({e}); starting from defaults",
                    self.path.display()
                );
                return Ok(RuntimeState::default());
            }
        };

        if let Err(e) = validate_canonical(&state.cached_class_windows) {
            warn!("cached class windows not canonical ({e}); repairing");
            state.cached_class_windows = canonicalize(state.cached_class_windows);
        }
        Ok(state)
    }
}

#[async_trait]
impl RuntimeStateStore for JsonStateStore {
    async fn runtime_state(&self) -> Result<RuntimeState, StoreError> {
        self.load().await
    }

    async fn patch_runtime_state(&self, patch: RuntimeStatePatch) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load().await?;
        patch.apply_to(&mut state);

        let json = serde_json::to_vec_pretty(&state)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        write_atomic(&self.path, &json)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {e}", self.path.display())))?;
        debug!("runtime state written to {}", self.path.display());
        Ok(())
    }
}
