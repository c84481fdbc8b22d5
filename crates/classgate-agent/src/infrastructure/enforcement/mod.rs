//! Rule sinks: where compiled rules take effect.
//!
//! - [`JsonRuleFile`] publishes the full rule set as a declarative
//!   network-request JSON array, for a browser extension or proxy to load.
//! - [`HostsFile`] maps blocked hosts to `0.0.0.0` inside a managed section of
//!   a hosts file.
//! - [`FanOutSink`] applies one rule set to several sinks.
//!
//! Every sink performs a full replace: the previous rule set leaves no trace.

pub mod hosts;
pub mod json_rules;

use std::sync::Arc;

use async_trait::async_trait;
use classgate_core::CompiledRule;
use tracing::warn;

use crate::application::reconcile::{ApplyError, RuleSink};

pub use hosts::HostsFile;
pub use json_rules::JsonRuleFile;

/// Applies each rule set to every inner sink.
///
/// All sinks are attempted even when one fails; the first error is returned.
#[derive(Clone, Default)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn RuleSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Arc<dyn RuleSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl RuleSink for FanOutSink {
    async fn apply_rules(&self, rules: &[CompiledRule]) -> Result<(), ApplyError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.apply_rules(rules).await {
                warn!("rule sink failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classgate_core::build_blocking_rules;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<usize>>,
        should_fail: bool,
    }

    #[async_trait]
    impl RuleSink for RecordingSink {
        async fn apply_rules(&self, rules: &[CompiledRule]) -> Result<(), ApplyError> {
            self.calls.lock().unwrap().push(rules.len());
            if self.should_fail {
                return Err(ApplyError::Io("disk full".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_sink_despite_failure() {
        // Arrange
        let failing = Arc::new(RecordingSink {
            should_fail: true,
            ..RecordingSink::default()
        });
        let healthy = Arc::new(RecordingSink::default());
        let sink = FanOutSink::new(vec![
            Arc::clone(&failing) as Arc<dyn RuleSink>,
            Arc::clone(&healthy) as Arc<dyn RuleSink>,
        ]);
        let rules = build_blocking_rules(&["a.com", "b.com"], &["c.com"]);

        // Act
        let result = sink.apply_rules(&rules).await;

        // Assert
        assert!(matches!(result, Err(ApplyError::Io(_))));
        assert_eq!(*failing.calls.lock().unwrap(), vec![3]);
        assert_eq!(*healthy.calls.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_empty_fan_out_succeeds() {
        let sink = FanOutSink::default();
        assert!(sink.is_empty());
        assert!(sink.apply_rules(&[]).await.is_ok());
    }
}
