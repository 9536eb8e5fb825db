use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::{is_safe_exercise_id, parse_descriptor, ExerciseStore};
use crate::rules::ValidationDescriptor;

/// One `<exercise_id>.json` descriptor per file
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ExerciseStore for DirectoryStore {
    async fn fetch_validation_descriptor(
        &self,
        exercise_id: &str,
    ) -> Result<Option<ValidationDescriptor>> {
        if !is_safe_exercise_id(exercise_id) {
            return Ok(None);
        }
        let path = self.root.join(format!("{}.json", exercise_id));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No descriptor at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        parse_descriptor(exercise_id, &raw).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_descriptor_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("area.json"),
            r#"{"strategy_tag": "simple_print", "rules": {"expected_exact_output": "50"},
                "custom_feedback": {"wrong_output": "Revisa el cálculo"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("roto.json"), "{").unwrap();

        let store = DirectoryStore::new(dir.path());
        let descriptor = store.fetch_validation_descriptor("area").await.unwrap().unwrap();
        assert_eq!(descriptor.strategy_tag, "simple_print");
        assert_eq!(descriptor.custom_feedback["wrong_output"], "Revisa el cálculo");

        assert!(store.fetch_validation_descriptor("otro").await.unwrap().is_none());
        assert!(store.fetch_validation_descriptor("../area").await.unwrap().is_none());
        assert!(store.fetch_validation_descriptor("roto").await.is_err());
    }
}
