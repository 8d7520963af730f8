//! In-memory object store

use crate::error::{Result, StoreError};
use crate::{ObjectBody, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct State {
    containers: BTreeMap<String, BTreeMap<String, Bytes>>,
    failing_names: BTreeSet<String>,
    offline: bool,
    put_calls: usize,
}

/// Containers held in process memory
///
/// Failures can be injected per object name, or for the whole store, to
/// exercise error paths without a network.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty container
    pub fn with_container(self, container: &str) -> Self {
        self.state
            .lock()
            .containers
            .entry(container.to_string())
            .or_default();
        self
    }

    /// Place an object directly, creating the container if needed
    pub fn insert(&self, container: &str, name: &str, content: impl Into<Bytes>) {
        self.state
            .lock()
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), content.into());
    }

    pub fn get(&self, container: &str, name: &str) -> Option<Bytes> {
        self.state
            .lock()
            .containers
            .get(container)
            .and_then(|objects| objects.get(name).cloned())
    }

    /// Sorted object names of a container
    pub fn names(&self, container: &str) -> Vec<String> {
        self.state
            .lock()
            .containers
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of `put_object` calls, successful or not
    pub fn put_calls(&self) -> usize {
        self.state.lock().put_calls
    }

    /// Make every upload of `name` fail
    pub fn fail_uploads_of(&self, name: &str) {
        self.state.lock().failing_names.insert(name.to_string());
    }

    /// Make every operation fail as if the endpoint were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let state = self.state.lock();
        if state.offline {
            return Err(StoreError::Auth("store is offline".to_string()));
        }
        let objects = state
            .containers
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        Ok(objects
            .keys()
            .filter(|name| prefix.map_or(true, |prefix| name.starts_with(prefix)))
            .cloned()
            .collect())
    }

    async fn put_object(&self, container: &str, name: &str, body: ObjectBody) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.put_calls += 1;
            if state.offline {
                return Err(StoreError::Auth("store is offline".to_string()));
            }
            if state.failing_names.contains(name) {
                return Err(StoreError::Status {
                    method: "PUT",
                    url: format!("/{}/{}", container, name),
                    status: 503,
                    body: "injected failure".to_string(),
                });
            }
        }

        let content = tokio::fs::read(body.path()).await?;
        self.insert(container, name, content);
        Ok(())
    }
}
