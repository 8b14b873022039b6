//! Persistent blob store for sandbox configuration, state and snapshots.
//!
//! Blobs are addressed by sandbox ID and [`BlobKind`]. The filesystem layout
//! used by [`FsBlobStore`] is:
//!
//! ```text
//! <root>/<sandbox_id>/config.json
//! <root>/<sandbox_id>/state/current.json
//! <root>/<sandbox_id>/snapshots/<snapshot_id>/state.json
//! ```

use crate::error::CoreError;
use crate::sandbox::SandboxId;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Kind of blob stored for a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// Configuration written on create.
    Config,
    /// Current state, rewritten on pause/hibernate/terminate.
    State,
    /// Named historical snapshot written on hibernate.
    Snapshot(String),
}

impl BlobKind {
    /// Path of this blob relative to the sandbox's namespace.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            Self::Config => PathBuf::from("config.json"),
            Self::State => Path::new("state").join("current.json"),
            Self::Snapshot(name) => Path::new("snapshots").join(name).join("state.json"),
        }
    }
}

/// Path-addressed blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Location of a sandbox's namespace.
    fn location(&self, id: SandboxId) -> PathBuf;

    /// Allocate the namespace (config, state and snapshot areas).
    async fn prepare(&self, id: SandboxId) -> Result<(), CoreError>;

    /// Write a blob, replacing any previous content.
    async fn write(&self, id: SandboxId, kind: BlobKind, data: Bytes) -> Result<(), CoreError>;

    /// Read a blob. Returns `None` if it was never written.
    async fn read(&self, id: SandboxId, kind: BlobKind) -> Result<Option<Bytes>, CoreError>;

    /// Names of the snapshots of a sandbox, sorted.
    async fn list_snapshots(&self, id: SandboxId) -> Result<Vec<String>, CoreError>;
}

/// Blob store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`. Nothing is touched until first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn location(&self, id: SandboxId) -> PathBuf {
        self.root.join(id.to_string())
    }

    async fn prepare(&self, id: SandboxId) -> Result<(), CoreError> {
        let base = self.location(id);
        tracing::trace!(sandbox_id = %id, path = %base.display(), "Creating storage namespace");
        tokio::fs::create_dir_all(base.join("state")).await?;
        tokio::fs::create_dir_all(base.join("snapshots")).await?;
        Ok(())
    }

    async fn write(&self, id: SandboxId, kind: BlobKind, data: Bytes) -> Result<(), CoreError> {
        let path = self.location(id).join(kind.relative_path());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        tracing::trace!(sandbox_id = %id, path = %path.display(), size = data.len(), "Blob written");
        Ok(())
    }

    async fn read(&self, id: SandboxId, kind: BlobKind) -> Result<Option<Bytes>, CoreError> {
        let path = self.location(id).join(kind.relative_path());
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_snapshots(&self, id: SandboxId) -> Result<Vec<String>, CoreError> {
        let dir = self.location(id).join("snapshots");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-process blob store.
///
/// Useful for tests and for runtimes that do not need state to outlive the
/// process. Writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<(SandboxId, BlobKind), Bytes>>,
    fail_writes: AtomicBool,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `prepare` and `write` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of blobs held.
    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<(), CoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(CoreError::Storage("writes disabled".into()));
        }
        Ok(())
    }

    fn blobs(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(SandboxId, BlobKind), Bytes>>, CoreError> {
        self.blobs
            .lock()
            .map_err(|_| CoreError::Storage("blob map lock poisoned".into()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn location(&self, id: SandboxId) -> PathBuf {
        Path::new("memory").join(id.to_string())
    }

    async fn prepare(&self, _id: SandboxId) -> Result<(), CoreError> {
        self.check_writable()
    }

    async fn write(&self, id: SandboxId, kind: BlobKind, data: Bytes) -> Result<(), CoreError> {
        self.check_writable()?;
        self.blobs()?.insert((id, kind), data);
        Ok(())
    }

    async fn read(&self, id: SandboxId, kind: BlobKind) -> Result<Option<Bytes>, CoreError> {
        Ok(self.blobs()?.get(&(id, kind)).cloned())
    }

    async fn list_snapshots(&self, id: SandboxId) -> Result<Vec<String>, CoreError> {
        let mut names: Vec<String> = self
            .blobs()?
            .keys()
            .filter_map(|(owner, kind)| match kind {
                BlobKind::Snapshot(name) if *owner == id => Some(name.clone()),
                _ => None,
            })
            .collect();
        names.sort();
        Ok(names)
    }
}
