//! Named timers and the at-most-one-per-name registry.
//!
//! The controller uses two timers:
//!
//! | Name                   | Kind      | Purpose                               |
//! |------------------------|-----------|---------------------------------------|
//! | `periodicCalendarSync` | periodic  | refresh the calendar every few minutes |
//! | `boundaryRecheck`      | one-shot  | re-decide just after a class boundary  |
//!
//! Creating a timer always replaces any existing timer of the same name, so a
//! boundary timer can never fire twice for two different schedules.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Names of the timers the controller owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerName {
    PeriodicSync,
    BoundaryRecheck,
}

impl TimerName {
    /// Stable string form, used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TimerName::PeriodicSync => "periodicCalendarSync",
            TimerName::BoundaryRecheck => "boundaryRecheck",
        }
    }
}

impl fmt::Display for TimerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timer primitive the controller schedules against.
///
/// Implementations must never fire a one-shot timer before `when_ms`.
pub trait TimerScheduler: Send + Sync {
    /// Arms a one-shot timer at the wall-clock instant `when_ms`, replacing
    /// any existing timer of the same name.
    fn create_at(&self, name: TimerName, when_ms: i64);

    /// Arms a repeating timer, replacing any existing timer of the same name.
    fn create_periodic(&self, name: TimerName, period: Duration);

    /// Cancels the named timer.  Returns `true` if one was active.
    fn clear(&self, name: TimerName) -> bool;

    /// Returns `true` if the named timer is armed and has not yet completed.
    fn exists(&self, name: TimerName) -> bool;
}

/// Name-keyed storage for timer handles.
///
/// `H` is whatever the scheduler needs to cancel a timer later (a task
/// handle, a deadline, ...).  [`arm`](Self::arm) hands back the handle it
/// displaced so the caller can cancel it.
#[derive(Debug)]
pub struct TimerRegistry<H> {
    entries: HashMap<TimerName, H>,
}

impl<H> Default for TimerRegistry<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<H> TimerRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle` under `name`, returning the previous handle if any.
    pub fn arm(&mut self, name: TimerName, handle: H) -> Option<H> {
        self.entries.insert(name, handle)
    }

    /// Removes and returns the handle stored under `name`.
    pub fn disarm(&mut self, name: TimerName) -> Option<H> {
        self.entries.remove(&name)
    }

    pub fn get(&self, name: TimerName) -> Option<&H> {
        self.entries.get(&name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_names_match_alarm_names() {
        assert_eq!(TimerName::PeriodicSync.as_str(), "periodicCalendarSync");
        assert_eq!(TimerName::BoundaryRecheck.to_string(), "boundaryRecheck");
    }

    #[test]
    fn test_arm_returns_displaced_handle() {
        // Arrange
        let mut registry = TimerRegistry::new();
        assert!(registry.arm(TimerName::BoundaryRecheck, 100).is_none());

        // Act
        let displaced = registry.arm(TimerName::BoundaryRecheck, 200);

        // Assert: one entry per name, the old handle handed back
        assert_eq!(displaced, Some(100));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(TimerName::BoundaryRecheck), Some(&200));
    }

    #[test]
    fn test_names_are_independent() {
        let mut registry = TimerRegistry::new();
        registry.arm(TimerName::BoundaryRecheck, "b");
        registry.arm(TimerName::PeriodicSync, "p");

        assert_eq!(registry.disarm(TimerName::BoundaryRecheck), Some("b"));
        assert_eq!(registry.get(TimerName::PeriodicSync), Some(&"p"));
        assert_eq!(registry.disarm(TimerName::BoundaryRecheck), None);
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry: TimerRegistry<u8> = TimerRegistry::new();
        assert!(registry.is_empty());
    }
}
