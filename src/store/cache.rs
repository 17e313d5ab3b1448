//! Artifact cache
//!
//! Keeps deserialized artifacts in memory, one per key.
//! Entries are only ever dropped or replaced explicitly, when a commit lands.

use crate::artifact::{ArtifactKey, ModelArtifact};
use crate::error::PipelineError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: RwLock<HashMap<ArtifactKey, Arc<ModelArtifact>>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached artifact for `key`, whatever its version
    pub fn get(&self, key: &ArtifactKey) -> Result<Option<Arc<ModelArtifact>>, PipelineError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| PipelineError::Storage("artifact cache poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    pub fn insert(&self, artifact: Arc<ModelArtifact>) -> Result<(), PipelineError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PipelineError::Storage("artifact cache poisoned".to_string()))?;
        entries.insert(artifact.key.clone(), artifact);
        Ok(())
    }

    /// Keep an existing entry for the artifact's key, otherwise insert `artifact`
    pub fn get_or_insert(&self, artifact: Arc<ModelArtifact>) -> Result<Arc<ModelArtifact>, PipelineError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PipelineError::Storage("artifact cache poisoned".to_string()))?;
        Ok(entries
            .entry(artifact.key.clone())
            .or_insert(artifact)
            .clone())
    }

    /// Drop the entry for `key`; returns whether one was present
    pub fn invalidate(&self, key: &ArtifactKey) -> Result<bool, PipelineError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PipelineError::Storage("artifact cache poisoned".to_string()))?;
        let removed = entries.remove(key).is_some();
        if removed {
            log::debug!("invalidated cached artifact {}", key);
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup_and_invalidation() {
        let cache = ArtifactCache::new();
        let artifact = Arc::new(testing::sensor_artifact());
        let key = artifact.key.clone();
        cache.insert(artifact.clone()).unwrap();

        assert_eq!(cache.get(&key).unwrap().map(|a| a.version), Some(artifact.version));

        let newer = Arc::new(artifact.rekeyed(key.clone()));
        assert_eq!(cache.get_or_insert(newer.clone()).unwrap().version, artifact.version);
        cache.insert(newer.clone()).unwrap();
        assert_eq!(cache.get(&key).unwrap().map(|a| a.version), Some(newer.version));

        assert!(cache.invalidate(&key).unwrap());
        assert!(cache.get(&key).unwrap().is_none());
        assert!(!cache.invalidate(&key).unwrap());
    }
}
