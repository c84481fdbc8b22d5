//! Class windows: canonical interval sets and point-in-time queries.
//!
//! A [`TimeWindow`] is a half-open interval `[start_ms, end_ms)` in epoch
//! milliseconds during which blocking is suspended.  A *canonical* window
//! set is sorted by start, and no two windows overlap or touch: any pair with
//! `next.start <= prev.end` is merged into one spanning window.
//!
//! # Why half-open?
//!
//! The instant a class ends is the instant blocking resumes.  With a closed
//! interval both "in class" and "not in class" would be true at that exact
//! millisecond; half-open intervals make every instant unambiguous.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::event::RawEvent;

/// Errors reported when validating a persisted window set.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    /// A window's end is not after its start.
    #[error("window {index} is empty or inverted: [{start_ms}, {end_ms})")]
    Empty {
        index: usize,
        start_ms: i64,
        end_ms: i64,
    },

    /// Windows are not sorted by start.
    #[error("window {index} starts before its predecessor")]
    Unsorted { index: usize },

    /// A window overlaps or touches its predecessor and should have been merged.
    #[error("window {index} overlaps or touches its predecessor")]
    NotMerged { index: usize },
}

/// A half-open class interval `[start_ms, end_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    /// Creates a window, rejecting empty or inverted intervals.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::Empty`] when `end_ms <= start_ms`.
    pub fn new(start_ms: i64, end_ms: i64) -> Result<Self, WindowError> {
        if end_ms <= start_ms {
            return Err(WindowError::Empty {
                index: 0,
                start_ms,
                end_ms,
            });
        }
        Ok(Self { start_ms, end_ms })
    }

    /// Returns `true` if `now_ms` falls in `[start_ms, end_ms)`.
    pub fn contains(&self, now_ms: i64) -> bool {
        self.start_ms <= now_ms && now_ms < self.end_ms
    }

    /// Length of the window in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Sorts and merges arbitrary windows into a canonical set.
///
/// Empty or inverted windows are discarded.
pub fn canonicalize(mut windows: Vec<TimeWindow>) -> Vec<TimeWindow> {
    windows.retain(|w| w.end_ms > w.start_ms);
    windows.sort_by_key(|w| (w.start_ms, w.end_ms));

    let mut merged: Vec<TimeWindow> = Vec::with_capacity(windows.len());
    for w in windows {
        if let Some(last) = merged.last_mut() {
            if w.start_ms <= last.end_ms {
                last.end_ms = last.end_ms.max(w.end_ms);
                continue;
            }
        }
        merged.push(w);
    }
    merged
}

/// Converts raw calendar events into a canonical window set.
///
/// Only events with both a timed start and a timed end, and a positive
/// duration, contribute.  All-day and malformed events are skipped.
pub fn compute_class_windows_from_events(events: &[RawEvent]) -> Vec<TimeWindow> {
    let windows = events
        .iter()
        .filter_map(RawEvent::timed_bounds)
        .filter_map(|(start, end)| TimeWindow::new(start, end).ok())
        .collect();
    canonicalize(windows)
}

/// Checks that `windows` is a canonical set.
///
/// # Errors
///
/// Returns the first violation found, scanning from the front.
pub fn validate_canonical(windows: &[TimeWindow]) -> Result<(), WindowError> {
    for (index, w) in windows.iter().enumerate() {
        if w.end_ms <= w.start_ms {
            return Err(WindowError::Empty {
                index,
                start_ms: w.start_ms,
                end_ms: w.end_ms,
            });
        }
        if index == 0 {
            continue;
        }
        let prev = &windows[index - 1];
        if w.start_ms < prev.start_ms {
            return Err(WindowError::Unsorted { index });
        }
        if w.start_ms <= prev.end_ms {
            return Err(WindowError::NotMerged { index });
        }
    }
    Ok(())
}

/// Returns `true` iff `now_ms` falls inside some window.
pub fn is_in_class_at(windows: &[TimeWindow], now_ms: i64) -> bool {
    windows.iter().any(|w| w.contains(now_ms))
}

/// Returns the earliest window start or end strictly after `now_ms`.
///
/// Works on any window list; canonical input is not required.
pub fn next_boundary_after(windows: &[TimeWindow], now_ms: i64) -> Option<i64> {
    windows
        .iter()
        .flat_map(|w| [w.start_ms, w.end_ms])
        .filter(|&boundary| boundary > now_ms)
        .min()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
