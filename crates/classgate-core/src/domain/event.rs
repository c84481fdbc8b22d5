//! Calendar events as exported by the calendar provider.
//!
//! The shape follows the provider's event-list JSON: `start` and `end` each
//! carry either a `dateTime` (a timed instant) or a `date` (an all-day
//! event).  Unknown fields are ignored.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// One boundary of a calendar event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    /// RFC 3339 instant, present on timed events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    /// `YYYY-MM-DD`, present on all-day events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    /// A timed boundary at the given RFC 3339 instant.
    pub fn at(date_time: impl Into<String>) -> Self {
        Self {
            date_time: Some(date_time.into()),
            ..Self::default()
        }
    }

    /// An all-day boundary on the given date.
    pub fn on(date: impl Into<String>) -> Self {
        Self {
            date: Some(date.into()),
            ..Self::default()
        }
    }

    /// Epoch milliseconds of `date_time`, if present and parseable.
    pub fn instant_ms(&self) -> Option<i64> {
        let raw = self.date_time.as_deref()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|dt| dt.timestamp_millis())
    }
}

/// A raw calendar event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<EventTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EventTime>,
}

impl RawEvent {
    /// A timed event between two RFC 3339 instants.
    pub fn timed(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(EventTime::at(start)),
            end: Some(EventTime::at(end)),
            ..Self::default()
        }
    }

    /// Start and end in epoch milliseconds.
    ///
    /// Returns `None` for all-day events and for events whose start or end
    /// instant is missing or unparseable.  Ordering is not checked here.
    pub fn timed_bounds(&self) -> Option<(i64, i64)> {
        let start = self.start.as_ref()?.instant_ms()?;
        let end = self.end.as_ref()?.instant_ms()?;
        Some((start, end))
    }
}
