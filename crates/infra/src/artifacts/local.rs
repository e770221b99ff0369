use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use demusify_core::ArtifactRef;

use super::{ArtifactError, ArtifactReader, ArtifactStore};

/// Filesystem-backed artifact store rooted at a directory
/// (`$VOLUME_DIR/videos` in production).
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the store and its `input/`, `working/` and `output/` directories.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let store = Self::new(root);
        for dir in [
            ArtifactRef::INPUT_DIR,
            ArtifactRef::WORKING_DIR,
            ArtifactRef::OUTPUT_DIR,
        ] {
            let path = store.root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| ArtifactError::io(path.display(), e))?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of an artifact. `ArtifactRef` keys are validated to stay
    /// under the root, so this never points outside it.
    pub fn path_of(&self, key: &ArtifactRef) -> PathBuf {
        key.as_str()
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Make sure the parent directory of `key` exists, returning its path.
    pub async fn prepare(&self, key: &ArtifactRef) -> Result<PathBuf, ArtifactError> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArtifactError::io(key, e))?;
        }
        Ok(path)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, key: &ArtifactRef, bytes: &[u8]) -> Result<(), ArtifactError> {
        let path = self.prepare(key).await?;

        // Write next to the target and rename, so readers never see a partial file.
        let tmp = path.with_file_name(format!(".{}.{}.tmp", key.file_name(), Uuid::now_v7()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| ArtifactError::io(key, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ArtifactError::io(key, e));
        }

        debug!(artifact = %key, bytes = bytes.len(), "artifact written");
        Ok(())
    }

    async fn get(&self, key: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        match tokio::fs::read(self.path_of(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ArtifactError::NotFound(key.clone())),
            Err(e) => Err(ArtifactError::io(key, e)),
        }
    }

    async fn reader(&self, key: &ArtifactRef) -> Result<ArtifactReader, ArtifactError> {
        let not_found = |e: std::io::Error| {
            if e.kind() == ErrorKind::NotFound {
                ArtifactError::NotFound(key.clone())
            } else {
                ArtifactError::io(key, e)
            }
        };
        let file = tokio::fs::File::open(self.path_of(key)).await.map_err(not_found)?;
        let len = file.metadata().await.map_err(not_found)?.len();
        Ok(ArtifactReader {
            len,
            reader: Box::new(file),
        })
    }

    async fn exists(&self, key: &ArtifactRef) -> Result<bool, ArtifactError> {
        tokio::fs::try_exists(self.path_of(key))
            .await
            .map_err(|e| ArtifactError::io(key, e))
    }

    async fn delete(&self, key: &ArtifactRef) -> Result<(), ArtifactError> {
        match tokio::fs::remove_file(self.path_of(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArtifactError::io(key, e)),
        }
    }

    async fn copy(&self, from: &ArtifactRef, to: &ArtifactRef) -> Result<(), ArtifactError> {
        let dest = self.prepare(to).await?;
        match tokio::fs::copy(self.path_of(from), dest).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ArtifactError::NotFound(from.clone())),
            Err(e) => Err(ArtifactError::io(to, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ArtifactRef {
        ArtifactRef::new(s).unwrap()
    }

    #[tokio::test]
    async fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).await.unwrap();
        let k = key("working/a_audio.mp3");

        assert!(!store.exists(&k).await.unwrap());
        store.put(&k, b"hello").await.unwrap();
        assert!(store.exists(&k).await.unwrap());
        assert_eq!(store.get(&k).await.unwrap(), b"hello");
        assert_eq!(store.path_of(&k), dir.path().join("working").join("a_audio.mp3"));

        store.delete(&k).await.unwrap();
        store.delete(&k).await.unwrap();
        assert!(matches!(store.get(&k).await, Err(ArtifactError::NotFound(_))));
    }

    #[tokio::test]
    async fn copy_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let from = key("input/x.mp4");
        let to = key("nested/deeper/x.mp4");

        store.put(&from, b"video").await.unwrap();
        store.copy(&from, &to).await.unwrap();
        assert_eq!(store.get(&to).await.unwrap(), b"video");

        let missing = key("input/missing.mp4");
        assert!(matches!(
            store.copy(&missing, &to).await,
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn put_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).await.unwrap();
        store.put(&key("output/final.mp4"), b"1").await.unwrap();
        store.put(&key("output/final.mp4"), b"2").await.unwrap();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path().join("output")).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["final.mp4".to_string()]);
    }

    #[tokio::test]
    async fn reader_streams_the_file() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).await.unwrap();
        let k = key("output/big.mp4");
        let payload: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        store.put(&k, &payload).await.unwrap();

        let mut opened = store.reader(&k).await.unwrap();
        assert_eq!(opened.len, payload.len() as u64);
        let mut read = Vec::new();
        opened.reader.read_to_end(&mut read).await.unwrap();
        assert_eq!(read, payload);

        assert!(matches!(
            store.reader(&key("output/missing.mp4")).await,
            Err(ArtifactError::NotFound(_))
        ));
    }
}
