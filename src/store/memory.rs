//! In-memory model store

use crate::artifact::{ArtifactKey, ModelArtifact};
use crate::error::PipelineError;
use crate::store::{KeyedLocks, ModelStore};
use crate::types::Modality;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Artifacts held behind shared pointers; a commit swaps the pointer
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    artifacts: RwLock<HashMap<ArtifactKey, Arc<ModelArtifact>>>,
    locks: KeyedLocks,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for MemoryModelStore {
    fn load(&self, key: &ArtifactKey) -> Result<Option<Arc<ModelArtifact>>, PipelineError> {
        let artifacts = self
            .artifacts
            .read()
            .map_err(|_| PipelineError::Storage("memory store poisoned".to_string()))?;
        Ok(artifacts.get(key).cloned())
    }

    fn replace(&self, artifact: ModelArtifact) -> Result<Arc<ModelArtifact>, PipelineError> {
        let key = artifact.key.clone();
        let artifact = Arc::new(artifact);
        self.locks.with_lock(&key, || {
            let mut artifacts = self
                .artifacts
                .write()
                .map_err(|_| PipelineError::Storage("memory store poisoned".to_string()))?;
            artifacts.insert(key.clone(), artifact.clone());
            log::debug!("stored {} version {}", key, artifact.version);
            Ok(artifact.clone())
        })
    }

    fn list_users(&self, modality: Modality) -> Result<Vec<String>, PipelineError> {
        let artifacts = self
            .artifacts
            .read()
            .map_err(|_| PipelineError::Storage("memory store poisoned".to_string()))?;
        let mut users: Vec<String> = artifacts
            .keys()
            .filter(|k| k.modality == modality)
            .filter_map(|k| k.user_id.clone())
            .collect();
        users.sort();
        Ok(users)
    }
}
