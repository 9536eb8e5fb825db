use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use super::ExerciseStore;
use crate::rules::ValidationDescriptor;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    descriptors: HashMap<String, ValidationDescriptor>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, exercise_id: impl Into<String>, descriptor: ValidationDescriptor) -> Self {
        self.descriptors.insert(exercise_id.into(), descriptor);
        self
    }
}

#[async_trait]
impl ExerciseStore for MemoryStore {
    async fn fetch_validation_descriptor(
        &self,
        exercise_id: &str,
    ) -> Result<Option<ValidationDescriptor>> {
        Ok(self.descriptors.get(exercise_id).cloned())
    }
}
