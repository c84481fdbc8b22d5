//! Reconciler: keeps the active rule set in step with the class calendar.
//!
//! Every full pass walks the same sequence:
//!
//! ```text
//! Idle ─► Syncing ─► Deciding ─► Applying ─► Scheduling ─► Idle
//! ```
//!
//! 1. **Sync** – fetch the selected calendar's events around "now", turn them
//!    into canonical class windows and cache them.  A failed fetch records
//!    only a timestamp and an error message; the previous windows stay.
//! 2. **Decide** – inside a class window nothing is blocked; outside, the
//!    blocked/allowed lists are compiled into rules.
//! 3. **Apply** – hand the complete rule set to the [`RuleSink`], which
//!    replaces whatever was active before.
//! 4. **Schedule** – arm the boundary timer just after the next window start
//!    or end, so the decision flips on time.
//!
//! A boundary timer runs steps 2–4 only.  Passes never overlap: each one
//! holds the reconciler's pass lock from start to finish.
//!
//! # Testability
//!
//! Every collaborator is a trait object in [`ReconcilerPorts`], so tests drive
//! the controller with in-memory stores, a recording sink, recording timers
//! and a fixed clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use classgate_core::{
    build_blocking_rules, compute_class_windows_from_events, is_in_class_at, next_boundary_after,
    CompiledRule, TimeWindow,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::state::{RuntimeStatePatch, RuntimeStateStore, Settings, SettingsStore, StoreError};
use super::sync_calendar::{
    fetch_with_reauth, list_calendars_with_reauth, CalendarSummary, EventSource, FetchOutcome,
    TimeRange,
};
use super::timers::{TimerName, TimerScheduler};

/// Error recorded when a sync runs with no calendar selected.
pub const NO_CALENDAR_SELECTED: &str = "No calendar selected";

// ── Ports ─────────────────────────────────────────────────────────────────────

/// Error type for rule-sink operations.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The enforcement target could not be written.
    #[error("rule sink I/O failed: {0}")]
    Io(String),

    /// The enforcement target refused the rule set.
    #[error("rule sink rejected the rule set: {0}")]
    Rejected(String),
}

/// Destination for compiled rules.
///
/// `apply_rules` is a full replace: afterwards exactly `rules` are active.
#[async_trait]
pub trait RuleSink: Send + Sync {
    async fn apply_rules(&self, rules: &[CompiledRule]) -> Result<(), ApplyError>;
}

/// Wall-clock source in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Error type for reconciliation passes.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("calendar listing failed: {0}")]
    Calendar(String),
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Timing parameters for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Interval of the periodic sync timer.
    pub periodic_sync: Duration,
    /// Offset added to each boundary so the timer never fires just before it.
    pub boundary_slack: Duration,
    /// How far ahead of "now" events are fetched.
    pub lookahead: Duration,
    /// How far behind "now" events are fetched, to catch a class in progress.
    pub lookbehind: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            periodic_sync: Duration::from_secs(5 * 60),
            boundary_slack: Duration::from_secs(5),
            lookahead: Duration::from_secs(7 * 24 * 60 * 60),
            lookbehind: Duration::from_secs(10 * 60),
        }
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// The collaborators a [`Reconciler`] drives.
#[derive(Clone)]
pub struct ReconcilerPorts {
    pub settings: Arc<dyn SettingsStore>,
    pub state: Arc<dyn RuntimeStateStore>,
    pub events: Arc<dyn EventSource>,
    pub sink: Arc<dyn RuleSink>,
    pub timers: Arc<dyn TimerScheduler>,
    pub clock: Arc<dyn Clock>,
}

// ── Results ───────────────────────────────────────────────────────────────────

/// Events that start controller work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The agent process started.
    Startup,
    /// First run after installation.
    Installed,
    /// The periodic sync timer fired.
    PeriodicTimer,
    /// The boundary timer fired.
    BoundaryTimer,
    /// Blocked/allowed lists or the selected calendar changed.
    SettingsChanged,
    /// The user asked for an immediate sync.
    SyncNow,
}

/// Rules chosen for one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub in_class: bool,
    pub rules: Vec<CompiledRule>,
}

/// Chooses the rule set for `now_ms`.
///
/// In class the set is empty; otherwise it is the compiled blocked/allowed
/// lists.
pub fn decide(settings: &Settings, windows: &[TimeWindow], now_ms: i64) -> Decision {
    let in_class = is_in_class_at(windows, now_ms);
    let rules = if in_class {
        Vec::new()
    } else {
        build_blocking_rules(&settings.blocked_domains, &settings.allowed_domains)
    };
    Decision { in_class, rules }
}

/// Outcome of a pass that reached the apply step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub in_class: bool,
    pub rules_applied: usize,
    /// The boundary the timer was armed for, before slack.
    pub next_boundary: Option<i64>,
}

/// Read-only snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub in_class: bool,
    pub next_boundary: Option<i64>,
    pub last_sync_at: Option<i64>,
    pub last_sync_error: Option<String>,
    pub calendar_time_zone: Option<String>,
    pub cached_windows: usize,
}

// ── Reconciler ────────────────────────────────────────────────────────────────

/// The reconciliation controller.
pub struct Reconciler {
    ports: ReconcilerPorts,
    config: ReconcileConfig,
    /// Serialises passes; the runtime-state store has a single writer.
    pass_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(ports: ReconcilerPorts, config: ReconcileConfig) -> Self {
        Self {
            ports,
            config,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Routes a trigger to the pass it requires.
    ///
    /// # Errors
    ///
    /// See [`reevaluate`](Self::reevaluate).
    pub async fn handle(&self, trigger: Trigger) -> Result<ReconciliationResult, ReconcileError> {
        debug!("handling trigger {trigger:?}");
        match trigger {
            Trigger::BoundaryTimer => self.on_boundary().await,
            Trigger::SyncNow => self.reevaluate(true).await,
            Trigger::Startup
            | Trigger::Installed
            | Trigger::PeriodicTimer
            | Trigger::SettingsChanged => self.reevaluate(false).await,
        }
    }

    /// Runs a full pass: sync, decide, apply, schedule.
    ///
    /// Sync problems never fail the pass; they are recorded in the runtime
    /// state and the decision uses the cached windows.  Scheduling runs even
    /// when applying fails.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::Store`] if settings or state cannot be read.
    /// - [`ReconcileError::Apply`] if the sink rejected the rule set.
    pub async fn reevaluate(
        &self,
        interactive: bool,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let _pass = self.pass_lock.lock().await;
        let span = info_span!("pass", id = %Uuid::new_v4(), interactive);
        async {
            self.ensure_periodic_timer();
            self.sync(interactive).await;
            self.decide_apply_schedule().await
        }
        .instrument(span)
        .await
    }

    /// Re-decides and reschedules from cached windows without syncing.
    ///
    /// # Errors
    ///
    /// Same as [`reevaluate`](Self::reevaluate).
    pub async fn on_boundary(&self) -> Result<ReconciliationResult, ReconcileError> {
        let _pass = self.pass_lock.lock().await;
        let span = info_span!("boundary", id = %Uuid::new_v4());
        self.decide_apply_schedule().instrument(span).await
    }

    /// Applies the current decision only; no sync and no timer changes.
    ///
    /// # Errors
    ///
    /// Same as [`reevaluate`](Self::reevaluate).
    pub async fn apply_blocking(&self) -> Result<ReconciliationResult, ReconcileError> {
        let _pass = self.pass_lock.lock().await;
        let settings = self.ports.settings.settings().await?;
        let state = self.ports.state.runtime_state().await?;
        let now = self.ports.clock.now_ms();

        let decision = decide(&settings, &state.cached_class_windows, now);
        self.ports.sink.apply_rules(&decision.rules).await?;
        Ok(ReconciliationResult {
            in_class: decision.in_class,
            rules_applied: decision.rules.len(),
            next_boundary: next_boundary_after(&state.cached_class_windows, now),
        })
    }

    /// Returns the current decision and the last sync outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Store`] if the runtime state cannot be read.
    pub async fn query_status(&self) -> Result<Status, ReconcileError> {
        let state = self.ports.state.runtime_state().await?;
        let now = self.ports.clock.now_ms();
        Ok(Status {
            in_class: is_in_class_at(&state.cached_class_windows, now),
            next_boundary: next_boundary_after(&state.cached_class_windows, now),
            last_sync_at: state.last_calendar_sync_at,
            last_sync_error: state.last_calendar_sync_error,
            calendar_time_zone: state.calendar_time_zone,
            cached_windows: state.cached_class_windows.len(),
        })
    }

    /// Lists selectable calendars, re-authenticating once if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Calendar`] with a user-facing message.
    pub async fn list_calendars(
        &self,
        interactive: bool,
        force_reauth: bool,
    ) -> Result<Vec<CalendarSummary>, ReconcileError> {
        let outcome =
            list_calendars_with_reauth(self.ports.events.as_ref(), interactive, force_reauth).await;
        match outcome {
            FetchOutcome::Success(calendars) => Ok(calendars),
            failed => Err(ReconcileError::Calendar(
                failed.failure_message().unwrap_or_default(),
            )),
        }
    }

    // ── Pass steps ────────────────────────────────────────────────────────────

    fn ensure_periodic_timer(&self) {
        if !self.ports.timers.exists(TimerName::PeriodicSync) {
            info!(
                "arming {} every {:?}",
                TimerName::PeriodicSync,
                self.config.periodic_sync
            );
            self.ports
                .timers
                .create_periodic(TimerName::PeriodicSync, self.config.periodic_sync);
        }
    }

    async fn sync(&self, interactive: bool) {
        if let Err(e) = self.try_sync(interactive).await {
            warn!("calendar sync could not be recorded: {e}");
        }
    }

    async fn try_sync(&self, interactive: bool) -> Result<(), StoreError> {
        let settings = self.ports.settings.settings().await?;
        let now = self.ports.clock.now_ms();

        let calendar_id = match settings.selected_calendar_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                info!("no calendar selected; clearing cached class windows");
                return self
                    .ports
                    .state
                    .patch_runtime_state(RuntimeStatePatch {
                        cached_class_windows: Some(Vec::new()),
                        calendar_time_zone: Some(None),
                        last_calendar_sync_at: Some(now),
                        last_calendar_sync_error: Some(Some(NO_CALENDAR_SELECTED.to_string())),
                    })
                    .await;
            }
        };

        let range = TimeRange {
            start_ms: now.saturating_sub(millis(self.config.lookbehind)),
            end_ms: now.saturating_add(millis(self.config.lookahead)),
        };
        let outcome =
            fetch_with_reauth(self.ports.events.as_ref(), &calendar_id, range, interactive).await;
        let synced_at = self.ports.clock.now_ms();

        let patch = match outcome {
            FetchOutcome::Success(batch) => {
                let windows = compute_class_windows_from_events(&batch.items);
                info!(
                    "synced calendar {calendar_id}: {} events, {} class windows",
                    batch.items.len(),
                    windows.len()
                );
                RuntimeStatePatch {
                    cached_class_windows: Some(windows),
                    calendar_time_zone: Some(batch.time_zone),
                    last_calendar_sync_at: Some(synced_at),
                    last_calendar_sync_error: Some(None),
                }
            }
            failed => {
                let message = failed.failure_message().unwrap_or_default();
                warn!("calendar sync failed, keeping cached windows: {message}");
                RuntimeStatePatch {
                    last_calendar_sync_at: Some(synced_at),
                    last_calendar_sync_error: Some(Some(message)),
                    ..RuntimeStatePatch::default()
                }
            }
        };
        self.ports.state.patch_runtime_state(patch).await
    }

    async fn decide_apply_schedule(&self) -> Result<ReconciliationResult, ReconcileError> {
        let settings = self.ports.settings.settings().await?;
        let state = self.ports.state.runtime_state().await?;
        let now = self.ports.clock.now_ms();

        let decision = decide(&settings, &state.cached_class_windows, now);
        info!(
            "in_class={}; applying {} rules",
            decision.in_class,
            decision.rules.len()
        );
        let applied = self.ports.sink.apply_rules(&decision.rules).await;
        let next_boundary = self.schedule(&state.cached_class_windows, now);

        if let Err(e) = applied {
            warn!("rule sink failed: {e}");
            return Err(e.into());
        }
        Ok(ReconciliationResult {
            in_class: decision.in_class,
            rules_applied: decision.rules.len(),
            next_boundary,
        })
    }

    fn schedule(&self, windows: &[TimeWindow], now_ms: i64) -> Option<i64> {
        let next = next_boundary_after(windows, now_ms);
        self.ports.timers.clear(TimerName::BoundaryRecheck);
        match next {
            Some(boundary) => {
                let when = boundary.saturating_add(millis(self.config.boundary_slack));
                debug!("arming {} at {when}", TimerName::BoundaryRecheck);
                self.ports.timers.create_at(TimerName::BoundaryRecheck, when);
            }
            None => debug!("no future boundary; {} left unarmed", TimerName::BoundaryRecheck),
        }
        next
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
