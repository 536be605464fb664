//! File-backed checkpoint store
//!
//! One file per entity under a directory. A write goes to a temporary file
//! in the same directory, is synced, then renamed over the old checkpoint,
//! so a reader sees either the old or the new record.

use crate::error::{Result, StoreError};
use crate::traits::StateStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use voltage_model::EntityId;

const CHECKPOINT_EXT: &str = "state";

pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open (and create if needed) a checkpoint directory
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, entity_id: &EntityId) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.{}",
            entity_id.entity_type.as_str().to_ascii_lowercase(),
            entity_id.id,
            CHECKPOINT_EXT
        ))
    }
}

fn write_atomically(dir: &Path, path: &Path, record: &[u8]) -> std::io::Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(record)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

async fn blocking<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| StoreError::Other(anyhow::anyhow!("checkpoint task failed: {}", e)))?
        .map_err(StoreError::from)
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, entity_id: &EntityId) -> Result<Option<Bytes>> {
        let path = self.path_for(entity_id);
        blocking(move || match std::fs::read(&path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn put(&self, entity_id: &EntityId, record: Bytes) -> Result<()> {
        let dir = self.dir.clone();
        let path = self.path_for(entity_id);
        let len = record.len();
        blocking(move || write_atomically(&dir, &path, &record)).await?;
        debug!("[{}] checkpoint written ({} bytes)", entity_id, len);
        Ok(())
    }

    async fn remove(&self, entity_id: &EntityId) -> Result<bool> {
        let path = self.path_for(entity_id);
        blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path().join("checkpoints")).unwrap();
        let device = EntityId::device();

        assert_eq!(store.get(&device).await.unwrap(), None);
        store.put(&device, Bytes::from_static(b"first")).await.unwrap();
        store.put(&device, Bytes::from_static(b"second")).await.unwrap();
        assert_eq!(
            store.get(&device).await.unwrap(),
            Some(Bytes::from_static(b"second"))
        );

        assert!(store.remove(&device).await.unwrap());
        assert!(!store.remove(&device).await.unwrap());
        assert_eq!(store.get(&device).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        let a = EntityId::device();
        let b = EntityId::asset();
        store.put(&a, Bytes::from_static(b"a")).await.unwrap();
        store.put(&b, Bytes::from_static(b"b")).await.unwrap();

        let mut names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.ends_with(".state")));
        assert!(names.iter().any(|n| n.starts_with("asset_")));
    }
}
