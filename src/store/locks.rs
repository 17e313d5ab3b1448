//! Per-key write locks
//!
//! Writers to the same artifact key queue behind one mutex; writers to
//! different keys never contend beyond a brief lookup in the lock table.

use crate::artifact::ArtifactKey;
use crate::error::PipelineError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<ArtifactKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding writes to `key`
    pub fn for_key(&self, key: &ArtifactKey) -> Result<Arc<Mutex<()>>, PipelineError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| PipelineError::Storage("lock table poisoned".to_string()))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }

    /// Run `f` while holding the write lock for `key`
    pub fn with_lock<T>(
        &self,
        key: &ArtifactKey,
        f: impl FnOnce() -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let lock = self.for_key(key)?;
        let _guard = lock
            .lock()
            .map_err(|_| PipelineError::Storage(format!("write lock for {} poisoned", key)))?;
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Modality;

    #[test]
    fn test_same_key_shares_lock() {
        let locks = KeyedLocks::new();
        let key = ArtifactKey::user("a", Modality::Sensor);
        let first = locks.for_key(&key).unwrap();
        let second = locks.for_key(&key).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = locks
            .for_key(&ArtifactKey::user("b", Modality::Sensor))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let a = ArtifactKey::user("a", Modality::Survey);
        let b = ArtifactKey::user("b", Modality::Survey);
        let result = locks.with_lock(&a, || locks.with_lock(&b, || Ok(7)));
        assert_eq!(result.unwrap(), 7);
    }
}
