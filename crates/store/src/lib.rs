//! Object store access for snapvault
//!
//! The remote container is the only durable state: an archived snapshot is an
//! object whose name encodes the snapshot identity.
//!
//! # Modules
//!
//! - [`swift`]: OpenStack Swift client (Keystone v3 auth, static large objects)
//! - [`memory`]: in-process store used by tests and dry experiments
//! - [`config`]: explicit client configuration

pub mod config;
pub mod error;
pub mod memory;
pub mod swift;

pub use config::{SwiftAuth, SwiftConfig};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use swift::SwiftStore;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Minimal object store contract the sync engine relies on
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Names of every object in `container`, optionally restricted to a prefix
    async fn list(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>>;

    /// Store `body` under `name`, replacing any previous object
    async fn put_object(&self, container: &str, name: &str, body: ObjectBody) -> Result<()>;
}

/// Object content backed by a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectBody {
    path: PathBuf,
    len: u64,
}

impl ObjectBody {
    /// Describe the file at `path`, reading its current size
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(Self { path, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
