use std::path::{Path, PathBuf};

use moka::future::Cache;
use uuid::Uuid;

use crate::domain::speech::{CacheKey, StorageError};

/// Recent-key lookup cache size, purely to skip repeated filesystem
/// existence checks under bursty identical requests.
const LOOKUP_CACHE_CAPACITY: u64 = 100;

/// Filesystem-backed, content-addressed store of rendered audio.
///
/// Entries are named by [`CacheKey`], written once and never evicted by this
/// subsystem. An optional bounded in-memory front remembers keys recently
/// confirmed on disk; its absence only costs redundant `try_exists` calls.
pub struct AudioCacheStore {
    root: PathBuf,
    recent: Option<Cache<String, ()>>,
}

impl AudioCacheStore {
    pub async fn new(
        root: impl Into<PathBuf>,
        lookup_cache_enabled: bool,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StorageError::Io {
                path: root.clone(),
                source,
            })?;

        let recent = lookup_cache_enabled.then(|| Cache::new(LOOKUP_CACHE_CAPACITY));
        Ok(Self { root, recent })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Whether an entry for `key` is on disk. Errors only on I/O failure,
    /// never on a plain miss.
    pub async fn exists(&self, key: &CacheKey) -> Result<bool, StorageError> {
        if let Some(recent) = &self.recent {
            if recent.contains_key(key.as_str()) {
                return Ok(true);
            }
        }

        let path = self.path_for(key);
        let found = tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StorageError::Io { path, source })?;

        if found {
            if let Some(recent) = &self.recent {
                recent.insert(key.as_str().to_owned(), ()).await;
            }
        }
        Ok(found)
    }

    pub async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    /// Persist `audio` under `key`.
    ///
    /// Writes to a staging file and renames into place, so a concurrent
    /// reader never observes a partial entry. Writing an existing key
    /// replaces it, which under deterministic keys only ever rewrites
    /// identical content.
    pub async fn write(&self, key: &CacheKey, audio: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let staging = self
            .root
            .join(format!(".{}.{}.tmp", key.as_str(), Uuid::new_v4()));

        tokio::fs::write(&staging, audio)
            .await
            .map_err(|source| StorageError::Io {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| StorageError::Io { path, source })?;

        if let Some(recent) = &self.recent {
            recent.insert(key.as_str().to_owned(), ()).await;
        }
        Ok(())
    }
}
