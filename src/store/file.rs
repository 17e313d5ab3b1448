//! Directory-backed model store
//!
//! One JSON file per artifact key. A commit writes a uniquely named temporary
//! file in the same directory and renames it over the target, so the file on
//! disk is always a complete artifact.

use crate::artifact::{ArtifactKey, ModelArtifact};
use crate::error::PipelineError;
use crate::store::{ArtifactCache, KeyedLocks, ModelStore};
use crate::types::Modality;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
pub struct FileModelStore {
    root: PathBuf,
    cache: ArtifactCache,
    locks: KeyedLocks,
}

impl FileModelStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            cache: ArtifactCache::new(),
            locks: KeyedLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `key`
    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(file_name(key))
    }

    fn read_from_disk(&self, key: &ArtifactKey) -> Result<Option<ModelArtifact>, PipelineError> {
        let path = self.path_for(key);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let artifact = ModelArtifact::from_json(&json)?;
        if artifact.key != *key {
            return Err(PipelineError::Storage(format!(
                "{} holds artifact {}, expected {}",
                path.display(),
                artifact.key,
                key
            )));
        }
        Ok(Some(artifact))
    }
}

impl ModelStore for FileModelStore {
    fn load(&self, key: &ArtifactKey) -> Result<Option<Arc<ModelArtifact>>, PipelineError> {
        if let Some(cached) = self.cache.get(key)? {
            return Ok(Some(cached));
        }
        match self.read_from_disk(key)? {
            Some(artifact) => Ok(Some(self.cache.get_or_insert(Arc::new(artifact))?)),
            None => Ok(None),
        }
    }

    fn replace(&self, artifact: ModelArtifact) -> Result<Arc<ModelArtifact>, PipelineError> {
        let key = artifact.key.clone();
        let json = artifact.to_json()?;
        let artifact = Arc::new(artifact);

        self.locks.with_lock(&key, || {
            let target = self.path_for(&key);
            let tmp = self
                .root
                .join(format!(".{}.{}.tmp", file_name(&key), Uuid::new_v4()));

            let written = (|| -> Result<(), PipelineError> {
                let mut file = fs::File::create(&tmp)?;
                file.write_all(json.as_bytes())?;
                file.sync_all()?;
                fs::rename(&tmp, &target)?;
                Ok(())
            })();
            if let Err(e) = written {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }

            self.cache.invalidate(&key)?;
            self.cache.insert(artifact.clone())?;
            log::debug!("committed {} to {}", key, target.display());
            Ok(artifact.clone())
        })
    }

    fn list_users(&self, modality: Modality) -> Result<Vec<String>, PipelineError> {
        let prefix = format!("user-{}-", modality);
        let mut users = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(encoded) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                if let Some(user) = decode_user_id(encoded) {
                    users.push(user);
                }
            }
        }
        users.sort();
        Ok(users)
    }
}

fn file_name(key: &ArtifactKey) -> String {
    match &key.user_id {
        Some(user) => format!("user-{}-{}.json", key.modality, encode_user_id(user)),
        None => format!("base-{}.json", key.modality),
    }
}

/// Keep `[A-Za-z0-9_-]`, percent-encode every other byte
fn encode_user_id(user_id: &str) -> String {
    let mut out = String::with_capacity(user_id.len());
    for b in user_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_user_id(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use pretty_assertions::assert_eq;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("migraine-store-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_user_id_encoding() {
        for id in ["plain", "with space", "ünï/cøde", "a%b"] {
            let encoded = encode_user_id(id);
            assert!(!encoded.contains('/'));
            assert_eq!(decode_user_id(&encoded).as_deref(), Some(id));
        }
    }

    #[test]
    fn test_commit_and_reopen() {
        let root = temp_root();
        let base = testing::sensor_artifact();
        let user = base.rekeyed(ArtifactKey::user("user 1", Modality::Sensor));
        {
            let store = FileModelStore::open(&root).unwrap();
            store.save_base(base.clone()).unwrap();
            store.commit_user(user.clone()).unwrap();
        }

        let reopened = FileModelStore::open(&root).unwrap();
        let loaded = reopened.load_user("user 1", Modality::Sensor).unwrap().unwrap();
        assert_eq!(loaded.version, user.version);
        assert_eq!(loaded.schema, user.schema);
        assert_eq!(
            reopened.list_users(Modality::Sensor).unwrap(),
            vec!["user 1".to_string()]
        );
        assert!(reopened.load_user("user 2", Modality::Sensor).unwrap().is_none());

        // No temporary files left behind
        let leftovers = fs::read_dir(&root)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_commit_replaces_cached_entry() {
        let root = temp_root();
        let store = FileModelStore::open(&root).unwrap();
        let base = testing::sensor_artifact();
        let first = base.rekeyed(ArtifactKey::user("u", Modality::Sensor));
        let second = base.rekeyed(ArtifactKey::user("u", Modality::Sensor));

        store.commit_user(first.clone()).unwrap();
        assert_eq!(
            store.load_user("u", Modality::Sensor).unwrap().unwrap().version,
            first.version
        );
        store.commit_user(second.clone()).unwrap();
        assert_eq!(
            store.load_user("u", Modality::Sensor).unwrap().unwrap().version,
            second.version
        );
        let _ = fs::remove_dir_all(&root);
    }
}
