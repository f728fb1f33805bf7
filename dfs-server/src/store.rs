//! Backing stores holding the durable copy of each file.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tokio::{fs, io::AsyncWriteExt};

/// Whole-file read/write access to the durable copy.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// `ErrorKind::NotFound` means the file does not exist.
    async fn read_whole(&self, name: &str) -> io::Result<Bytes>;

    async fn write_whole(&self, name: &str, data: &[u8]) -> io::Result<()>;
}

/// Files stored flat under one local directory.
pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Only plain relative names are accepted, so no request reaches outside `root`.
    fn path_for(&self, name: &str) -> io::Result<PathBuf> {
        let rel = Path::new(name);
        let plain = !name.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name {name:?}"),
            ));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BackingStore for LocalFsStore {
    async fn read_whole(&self, name: &str) -> io::Result<Bytes> {
        let path = self.path_for(name)?;
        Ok(Bytes::from(fs::read(path).await?))
    }

    async fn write_whole(&self, name: &str, data: &[u8]) -> io::Result<()> {
        let path = self.path_for(name)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut f = fs::File::create(path).await?;
        f.write_all(data).await?;
        f.flush().await?;
        Ok(())
    }
}

/// In-memory store for embedding and tests.
#[derive(Default)]
pub struct InMemoryStore {
    files: Mutex<HashMap<String, Bytes>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, name: &str, data: impl Into<Bytes>) -> Self {
        self.insert(name, data);
        self
    }

    pub fn insert(&self, name: &str, data: impl Into<Bytes>) {
        self.lock().insert(name.to_string(), data.into());
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.lock().get(name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bytes>> {
        self.files.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn read_whole(&self, name: &str) -> io::Result<Bytes> {
        self.get(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    async fn write_whole(&self, name: &str, data: &[u8]) -> io::Result<()> {
        self.insert(name, Bytes::copy_from_slice(data));
        Ok(())
    }
}
