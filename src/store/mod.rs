//! Exercise descriptor stores
//!
//! The engine only ever asks one question of the content catalog: what
//! descriptor grades this exercise. `None` means the exercise is unknown.

mod directory;
mod memory;
mod s3;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::rules::ValidationDescriptor;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

#[async_trait]
pub trait ExerciseStore: Send + Sync {
    async fn fetch_validation_descriptor(
        &self,
        exercise_id: &str,
    ) -> Result<Option<ValidationDescriptor>>;
}

/// Exercise ids become file or object names; keep them to a safe alphabet
pub(crate) fn is_safe_exercise_id(exercise_id: &str) -> bool {
    !exercise_id.is_empty()
        && exercise_id.len() <= 128
        && exercise_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !exercise_id.starts_with('.')
}

pub(crate) fn parse_descriptor(exercise_id: &str, raw: &str) -> Result<ValidationDescriptor> {
    serde_json::from_str(raw)
        .with_context(|| format!("Invalid validation descriptor for exercise {}", exercise_id))
}

/// Build a store from an `EXERCISE_STORE` spec: `dir:<path>` or `s3:<prefix>`
pub async fn from_spec(spec: &str) -> Result<Box<dyn ExerciseStore>> {
    match spec.split_once(':') {
        Some(("dir", path)) => Ok(Box::new(DirectoryStore::new(path))),
        Some(("s3", prefix)) => Ok(Box::new(S3Store::from_env(prefix).await?)),
        _ => bail!("Unsupported EXERCISE_STORE '{}' (expected dir:<path> or s3:<prefix>)", spec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_exercise_ids() {
        assert!(is_safe_exercise_id("modulo1-ej03"));
        assert!(is_safe_exercise_id("py_101.area"));
        assert!(!is_safe_exercise_id("../secrets"));
        assert!(!is_safe_exercise_id("a/b"));
        assert!(!is_safe_exercise_id(".hidden"));
        assert!(!is_safe_exercise_id(""));
    }

    #[tokio::test]
    async fn test_from_spec() {
        assert!(from_spec("dir:/tmp/exercises").await.is_ok());
        assert!(from_spec("ftp:somewhere").await.is_err());
    }
}
