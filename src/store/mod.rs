//! User model store
//!
//! Persists base and per-user artifacts behind the [`ModelStore`] trait. Reads
//! are unlimited and concurrent; writes are serialized per artifact key and
//! replace the whole artifact atomically, so a reader sees either the previous
//! complete artifact or the new one.

mod cache;
mod file;
mod locks;
mod memory;

pub use cache::ArtifactCache;
pub use file::FileModelStore;
pub use locks::KeyedLocks;
pub use memory::MemoryModelStore;

use crate::artifact::{ArtifactKey, ModelArtifact};
use crate::error::PipelineError;
use crate::types::Modality;
use std::sync::Arc;

/// Storage for base and per-user artifacts
pub trait ModelStore: Send + Sync {
    /// Artifact at `key`, if any
    fn load(&self, key: &ArtifactKey) -> Result<Option<Arc<ModelArtifact>>, PipelineError>;

    /// Atomically replace whatever is stored at the artifact's key
    fn replace(&self, artifact: ModelArtifact) -> Result<Arc<ModelArtifact>, PipelineError>;

    /// Users holding a personalized artifact for `modality`, sorted
    fn list_users(&self, modality: Modality) -> Result<Vec<String>, PipelineError>;

    fn load_base(&self, modality: Modality) -> Result<Option<Arc<ModelArtifact>>, PipelineError> {
        self.load(&ArtifactKey::base(modality))
    }

    fn load_user(
        &self,
        user_id: &str,
        modality: Modality,
    ) -> Result<Option<Arc<ModelArtifact>>, PipelineError> {
        self.load(&ArtifactKey::user(user_id, modality))
    }

    fn save_base(&self, artifact: ModelArtifact) -> Result<Arc<ModelArtifact>, PipelineError> {
        if !artifact.key.is_base() {
            return Err(PipelineError::Storage(format!(
                "refusing to save {} as a base artifact",
                artifact.key
            )));
        }
        artifact.check_consistency()?;
        self.replace(artifact)
    }

    fn commit_user(&self, artifact: ModelArtifact) -> Result<Arc<ModelArtifact>, PipelineError> {
        if artifact.key.is_base() {
            return Err(PipelineError::Storage(format!(
                "refusing to commit {} as a user artifact",
                artifact.key
            )));
        }
        artifact.check_consistency()?;
        self.replace(artifact)
    }
}
