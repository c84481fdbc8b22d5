//! Rule set published as a JSON file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use classgate_core::CompiledRule;
use tracing::info;

use crate::application::reconcile::{ApplyError, RuleSink};
use crate::infrastructure::storage::write_atomic;

/// Writes the active rule set to `path` as a JSON array.
#[derive(Debug, Clone)]
pub struct JsonRuleFile {
    path: PathBuf,
}

impl JsonRuleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RuleSink for JsonRuleFile {
    async fn apply_rules(&self, rules: &[CompiledRule]) -> Result<(), ApplyError> {
        let json =
            serde_json::to_vec_pretty(rules).map_err(|e| ApplyError::Rejected(e.to_string()))?;
        write_atomic(&self.path, &json)
            .await
            .map_err(|e| ApplyError::Io(format!("{}: {e}", self.path.display())))?;
        info!("{} rules written to {}", rules.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classgate_core::build_blocking_rules;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_rule_file_is_replaced_not_appended() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("classgate_test_{}", Uuid::new_v4()));
        let sink = JsonRuleFile::new(dir.join("rules.json"));

        // Act
        sink.apply_rules(&build_blocking_rules(&["a.com", "b.com"], &[] as &[&str]))
            .await
            .unwrap();
        sink.apply_rules(&[]).await.unwrap();

        // Assert
        let content = std::fs::read_to_string(sink.path()).unwrap();
        let rules: Vec<CompiledRule> = serde_json::from_str(&content).unwrap();
        assert!(rules.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_rule_file_uses_declarative_shape() {
        let dir = std::env::temp_dir().join(format!("classgate_test_{}", Uuid::new_v4()));
        let sink = JsonRuleFile::new(dir.join("rules.json"));

        sink.apply_rules(&build_blocking_rules(&["youtube.com"], &["music.youtube.com"]))
            .await
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sink.path()).unwrap()).unwrap();
        assert_eq!(value[0]["id"], 2000);
        assert_eq!(value[0]["action"]["type"], "allow");
        assert_eq!(value[1]["condition"]["urlFilter"], "||youtube.com^");
        assert_eq!(value[1]["condition"]["resourceTypes"][0], "main_frame");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unwritable_path_reports_io_error() {
        // Arrange: the parent "directory" is a regular file
        let blocker = std::env::temp_dir().join(format!("classgate_test_{}", Uuid::new_v4()));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let sink = JsonRuleFile::new(blocker.join("rules.json"));

        // Act
        let result = tokio_test::block_on(sink.apply_rules(&[]));

        // Assert
        assert!(matches!(result, Err(ApplyError::Io(_))));

        std::fs::remove_file(&blocker).ok();
    }
}
