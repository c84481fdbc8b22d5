//! Hand-off of one-shot commands to a running daemon.
//!
//! `sync-now` and `apply` run a full pass.  Run from a second process, that
//! pass would write the state file and the rule sinks alongside the daemon,
//! and the boundary timer it armed would die with the CLI.  Instead the CLI
//! drops a request file; the daemon claims it on its next poll tick, runs the
//! pass under its own pass lock, and answers in a reply file.
//!
//! # Protocol (for beginners)
//!
//! ```text
//! CLI                                   daemon
//! ───                                   ──────
//! submit  ──► control.json
//!                                       take    (reads, then deletes)
//! wait_claimed (file gone?)
//!                                       runs the pass
//!            control.json.reply  ◄────  reply
//! wait_reply (matching id?)
//! ```
//!
//! Claiming and withdrawing both delete the request file, so when no daemon
//! answers in time the CLI withdraws and exactly one side runs the pass.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::reconcile::{ReconcileError, Reconciler, ReconciliationResult, Trigger};
use crate::infrastructure::storage::write_atomic;

/// Work a CLI process asks the daemon to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlKind {
    /// Full pass with an interactive sync.
    SyncNow,
    /// Decide and apply from the cached windows only.
    Apply,
}

/// A pending request as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub id: Uuid,
    pub kind: ControlKind,
}

/// The daemon's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlReply {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ReconciliationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    fn new(id: Uuid, outcome: &Result<ReconciliationResult, ReconcileError>) -> Self {
        match outcome {
            Ok(result) => Self {
                id,
                result: Some(result.clone()),
                error: None,
            },
            Err(e) => Self {
                id,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Request and reply files shared by the CLI and the daemon.
#[derive(Debug, Clone)]
pub struct ControlFile {
    path: PathBuf,
    reply_path: PathBuf,
}

impl ControlFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut reply = path.clone().into_os_string();
        reply.push(".reply");
        Self {
            path,
            reply_path: PathBuf::from(reply),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── CLI side ──────────────────────────────────────────────────────────────

    /// Writes a new request, replacing any unclaimed one.
    pub async fn submit(&self, kind: ControlKind) -> std::io::Result<ControlRequest> {
        let request = ControlRequest {
            id: Uuid::new_v4(),
            kind,
        };
        let json = serde_json::to_vec(&request).map_err(std::io::Error::other)?;
        write_atomic(&self.path, &json).await?;
        Ok(request)
    }

    /// Waits until the request file disappears or `timeout` passes.
    ///
    /// Returns `true` if the file was claimed in time.
    pub async fn wait_claimed(&self, timeout: Duration) -> std::io::Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !tokio::fs::try_exists(&self.path).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_STEP).await;
        }
    }

    /// Deletes an unclaimed request.
    ///
    /// Returns `false` when the daemon claimed it first.
    pub async fn withdraw(&self) -> std::io::Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Waits for the reply to request `id`; `None` on timeout.
    pub async fn wait_reply(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> std::io::Result<Option<ControlReply>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(reply) = self.read_reply().await? {
                if reply.id == id {
                    return Ok(Some(reply));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_STEP).await;
        }
    }

    async fn read_reply(&self) -> std::io::Result<Option<ControlReply>> {
        match tokio::fs::read(&self.reply_path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── Daemon side ───────────────────────────────────────────────────────────

    /// Claims the pending request, if any.
    ///
    /// An unparseable request is discarded with a warning.
    pub async fn take(&self) -> std::io::Result<Option<ControlRequest>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if !self.withdraw().await? {
            // Withdrawn by the CLI between our read and delete.
            return Ok(None);
        }
        match serde_json::from_slice(&bytes) {
            Ok(request) => Ok(Some(request)),
            Err(e) => {
                warn!("discarding malformed request {}: {e}", self.path.display());
                Ok(None)
            }
        }
    }

    /// Publishes the outcome of request `id`.
    pub async fn reply(
        &self,
        id: Uuid,
        outcome: &Result<ReconciliationResult, ReconcileError>,
    ) -> std::io::Result<()> {
        let json =
            serde_json::to_vec(&ControlReply::new(id, outcome)).map_err(std::io::Error::other)?;
        write_atomic(&self.reply_path, &json).await
    }
}

const POLL_STEP: Duration = Duration::from_millis(100);

/// Runs the pending request, if any, on `reconciler` and replies to it.
///
/// Returns the pass outcome so the caller can log it.
pub async fn serve_pending(
    control: &ControlFile,
    reconciler: &Reconciler,
) -> std::io::Result<Option<Result<ReconciliationResult, ReconcileError>>> {
    let Some(request) = control.take().await? else {
        return Ok(None);
    };
    info!("serving {:?} request {}", request.kind, request.id);
    let outcome = match request.kind {
        ControlKind::SyncNow => reconciler.handle(Trigger::SyncNow).await,
        ControlKind::Apply => reconciler.apply_blocking().await,
    };
    control.reply(request.id, &outcome).await?;
    Ok(Some(outcome))
}
