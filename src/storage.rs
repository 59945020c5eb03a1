use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put(&self, name: &str, body: Bytes) -> anyhow::Result<()>;
    /// `Ok(None)` when no image with that name exists.
    async fn get(&self, name: &str) -> anyhow::Result<Option<Bytes>>;
    async fn delete(&self, name: &str) -> anyhow::Result<()>;
}

/// Flat directory of image files.
#[derive(Clone)]
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub async fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("create images dir {}", root.display()))?;
        Ok(Self { root })
    }

    fn path_of(&self, name: &str) -> anyhow::Result<PathBuf> {
        anyhow::ensure!(is_plain_name(name), "invalid image name {name:?}");
        Ok(self.root.join(name))
    }
}

/// A single path segment: no separators, no parent references.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn put(&self, name: &str, body: Bytes) -> anyhow::Result<()> {
        let path = self.path_of(name)?;
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write image {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, name: &str) -> anyhow::Result<Option<Bytes>> {
        let path = self.path_of(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read image {}", path.display())),
        }
    }

    async fn delete(&self, name: &str) -> anyhow::Result<()> {
        let path = self.path_of(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("delete image {}", path.display())),
        }
    }
}
