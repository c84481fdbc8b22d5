//! Calendar event source port and the re-authentication state machine.
//!
//! The [`EventSource`] trait is the agent's only view of the calendar
//! provider.  Implementations may fail in two ways:
//!
//! - [`FetchError::Auth`] – the credentials were rejected.  This is often a
//!   stale cached token, so it is worth one retry after discarding the
//!   credentials and allowing interactive consent.
//! - [`FetchError::Transport`] – the provider could not be reached or
//!   answered with an error.  Retrying immediately rarely helps; the next
//!   periodic sync will try again.
//!
//! [`fetch_with_reauth`] turns those failures into a typed [`FetchOutcome`]:
//!
//! ```text
//! First ──Ok──────────────► Success
//!   │ ──Transport─────────► TransportFailed
//!   │ ──Auth──► invalidate credentials
//!   ▼
//! Reauthenticated ──Ok────► Success
//!                 ──Transport► TransportFailed
//!                 ──Auth──► AuthRetryExhausted
//! ```

use std::future::Future;

use async_trait::async_trait;
use classgate_core::RawEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for event-source operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Credentials missing or rejected; recoverable by re-authenticating.
    #[error("authorization failed: {0}")]
    Auth(String),

    /// The provider could not be reached or returned an error.
    #[error("calendar transport failed: {0}")]
    Transport(String),
}

/// Requested event range in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    /// Returns `true` if `[start_ms, end_ms)` intersects this range.
    pub fn overlaps(&self, start_ms: i64, end_ms: i64) -> bool {
        start_ms < self.end_ms && end_ms > self.start_ms
    }
}

/// Events returned for one calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub items: Vec<RawEvent>,
}

/// A calendar the user may select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSummary {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub access_role: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
}

/// Source of calendar events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetches the events of `calendar_id` that intersect `range`.
    ///
    /// `interactive` permits the source to prompt the user for consent.
    async fn fetch_events(
        &self,
        calendar_id: &str,
        range: TimeRange,
        interactive: bool,
    ) -> Result<EventBatch, FetchError>;

    /// Lists the calendars visible to the current credentials.
    async fn list_calendars(&self, interactive: bool) -> Result<Vec<CalendarSummary>, FetchError>;

    /// Discards cached credentials so the next call re-authenticates.
    async fn invalidate_credentials(&self);
}

/// Result of a fetch after at most one re-authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    Success(T),
    /// Auth failed on both attempts.
    AuthRetryExhausted(String),
    TransportFailed(String),
}

impl<T> FetchOutcome<T> {
    /// User-facing message for the failure variants.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            FetchOutcome::Success(_) => None,
            FetchOutcome::AuthRetryExhausted(msg) => Some(format!(
                "Calendar credentials were rejected again after re-authenticating: {msg}"
            )),
            FetchOutcome::TransportFailed(msg) => Some(msg.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Reauthenticated,
}

/// Runs `call` with the two-attempt re-authentication policy.
///
/// `call` receives the `interactive` flag to use for that attempt; the second
/// attempt is always interactive.
pub async fn with_reauth<T, F, Fut>(
    source: &dyn EventSource,
    interactive: bool,
    mut call: F,
) -> FetchOutcome<T>
where
    F: FnMut(bool) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = Attempt::First;
    loop {
        let interactive_now = interactive || attempt == Attempt::Reauthenticated;
        match (call(interactive_now).await, attempt) {
            (Ok(value), _) => return FetchOutcome::Success(value),
            (Err(FetchError::Transport(msg)), _) => return FetchOutcome::TransportFailed(msg),
            (Err(FetchError::Auth(msg)), Attempt::First) => {
                warn!("calendar credentials rejected ({msg}); re-authenticating once");
                source.invalidate_credentials().await;
                attempt = Attempt::Reauthenticated;
            }
            (Err(FetchError::Auth(msg)), Attempt::Reauthenticated) => {
                return FetchOutcome::AuthRetryExhausted(msg)
            }
        }
    }
}

/// Fetches events for `calendar_id` with one automatic re-authentication.
pub async fn fetch_with_reauth(
    source: &dyn EventSource,
    calendar_id: &str,
    range: TimeRange,
    interactive: bool,
) -> FetchOutcome<EventBatch> {
    debug!(
        "fetching calendar {calendar_id} for [{}, {})",
        range.start_ms, range.end_ms
    );
    with_reauth(source, interactive, |i| {
        source.fetch_events(calendar_id, range, i)
    })
    .await
}

/// Lists calendars with one automatic re-authentication.
///
/// With `force_reauth` the cached credentials are discarded up front so the
/// user is asked for consent again.
pub async fn list_calendars_with_reauth(
    source: &dyn EventSource,
    interactive: bool,
    force_reauth: bool,
) -> FetchOutcome<Vec<CalendarSummary>> {
    if force_reauth {
        source.invalidate_credentials().await;
    }
    with_reauth(source, interactive, |i| source.list_calendars(i)).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
