//! Tokio-backed timers and the system clock.
//!
//! Each armed timer is a spawned task that sleeps until its deadline and then
//! sends its [`TimerName`] down an `mpsc` channel.  The daemon loop receives
//! those names and turns them into controller triggers.
//!
//! # Firing never happens early
//!
//! `tokio::time::sleep` measures a monotonic duration, while deadlines are
//! wall-clock instants.  After each sleep the task re-reads the [`Clock`] and
//! sleeps again if the deadline has not been reached, so a clock adjustment
//! during the wait cannot make a boundary fire before the boundary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::reconcile::Clock;
use crate::application::timers::{TimerName, TimerRegistry, TimerScheduler};

/// Wall clock from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// [`TimerScheduler`] that runs each timer as a tokio task.
///
/// Must be used from within a tokio runtime.
pub struct TokioTimers {
    tx: mpsc::Sender<TimerName>,
    clock: Arc<dyn Clock>,
    registry: Mutex<TimerRegistry<JoinHandle<()>>>,
}

impl TokioTimers {
    /// Creates the scheduler and the receiving end of its firing channel.
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::Receiver<TimerName>) {
        let (tx, rx) = mpsc::channel(16);
        let timers = Self {
            tx,
            clock,
            registry: Mutex::new(TimerRegistry::new()),
        };
        (timers, rx)
    }

    fn install(&self, name: TimerName, handle: JoinHandle<()>) {
        let displaced = match self.registry.lock() {
            Ok(mut registry) => registry.arm(name, handle),
            Err(poisoned) => poisoned.into_inner().arm(name, handle),
        };
        if let Some(old) = displaced {
            debug!("replacing armed timer {name}");
            old.abort();
        }
    }
}

impl TimerScheduler for TokioTimers {
    fn create_at(&self, name: TimerName, when_ms: i64) {
        let tx = self.tx.clone();
        let clock = Arc::clone(&self.clock);
        let handle = tokio::spawn(async move {
            loop {
                let remaining = when_ms.saturating_sub(clock.now_ms());
                if remaining <= 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(remaining.unsigned_abs())).await;
            }
            if tx.send(name).await.is_err() {
                warn!("timer {name} fired after its receiver closed");
            }
        });
        self.install(name, handle);
    }

    fn create_periodic(&self, name: TimerName, period: Duration) {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticks = tokio::time::interval_at(start, period);
            loop {
                ticks.tick().await;
                if tx.send(name).await.is_err() {
                    debug!("timer {name} stopping; receiver closed");
                    break;
                }
            }
        });
        self.install(name, handle);
    }

    fn clear(&self, name: TimerName) -> bool {
        let removed = match self.registry.lock() {
            Ok(mut registry) => registry.disarm(name),
            Err(poisoned) => poisoned.into_inner().disarm(name),
        };
        match removed {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    fn exists(&self, name: TimerName) -> bool {
        let check = |registry: &TimerRegistry<JoinHandle<()>>| {
            registry.get(name).is_some_and(|h| !h.is_finished())
        };
        match self.registry.lock() {
            Ok(registry) => check(&registry),
            Err(poisoned) => check(&poisoned.into_inner()),
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        let registry = match self.registry.get_mut() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        };
        for name in [TimerName::PeriodicSync, TimerName::BoundaryRecheck] {
            if let Some(handle) = registry.disarm(name) {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn timers() -> (TokioTimers, mpsc::Receiver<TimerName>) {
        TokioTimers::new(Arc::new(SystemClock))
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[tokio::test]
    async fn test_one_shot_fires_once_at_deadline() {
        // Arrange
        let (timers, mut rx) = timers();
        let deadline = SystemClock.now_ms() + 30;

        // Act
        timers.create_at(TimerName::BoundaryRecheck, deadline);
        let fired = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();

        // Assert
        assert_eq!(fired, Some(TimerName::BoundaryRecheck));
        assert!(SystemClock.now_ms() >= deadline);
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_past_deadline_fires_immediately() {
        let (timers, mut rx) = timers();
        timers.create_at(TimerName::BoundaryRecheck, 0);
        let fired = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(fired, Some(TimerName::BoundaryRecheck));
    }

    #[tokio::test]
    async fn test_rearming_replaces_previous_timer() {
        // Arrange
        let (timers, mut rx) = timers();
        let now = SystemClock.now_ms();

        // Act: arm twice under one name
        timers.create_at(TimerName::BoundaryRecheck, now + 20);
        timers.create_at(TimerName::BoundaryRecheck, now + 60);

        // Assert: only one firing
        assert_eq!(
            timeout(Duration::from_secs(2), rx.recv()).await.unwrap(),
            Some(TimerName::BoundaryRecheck)
        );
        assert!(timeout(Duration::from_millis(150), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_cancels_pending_timer() {
        let (timers, mut rx) = timers();
        timers.create_at(TimerName::BoundaryRecheck, SystemClock.now_ms() + 50);
        assert!(timers.exists(TimerName::BoundaryRecheck));

        assert!(timers.clear(TimerName::BoundaryRecheck));

        assert!(!timers.exists(TimerName::BoundaryRecheck));
        assert!(!timers.clear(TimerName::BoundaryRecheck));
        assert!(timeout(Duration::from_millis(150), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_periodic_timer_repeats_and_exists() {
        let (timers, mut rx) = timers();
        timers.create_periodic(TimerName::PeriodicSync, Duration::from_millis(20));

        for _ in 0..2 {
            let fired = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
            assert_eq!(fired, Some(TimerName::PeriodicSync));
        }
        assert!(timers.exists(TimerName::PeriodicSync));
    }
}
