//! In-memory storage provider.
//!
//! Keeps objects in a map keyed by `(container, key)`. Used for local
//! development and tests; it honors the same contract as the remote
//! providers, including concurrent access from many upload tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{ProviderKind, StorageProvider};
use crate::error::StorageError;

/// [`StorageProvider`] holding every object in process memory.
///
/// Clones share the same underlying objects.
#[derive(Clone)]
pub struct MemoryProvider {
    kind: ProviderKind,
    objects: Arc<RwLock<HashMap<(String, String), Bytes>>>,
    store_count: Arc<AtomicUsize>,
}

impl MemoryProvider {
    /// Create an empty provider reporting itself as `kind`.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            objects: Arc::new(RwLock::new(HashMap::new())),
            store_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Seed an object.
    pub async fn insert(&self, container: &str, key: &str, data: impl Into<Bytes>) {
        self.objects
            .write()
            .await
            .insert((container.to_string(), key.to_string()), data.into());
    }

    /// Read an object without going through the provider contract.
    pub async fn get(&self, container: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .await
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    /// All keys stored in `container`, sorted.
    pub async fn keys(&self, container: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of successful `store` calls so far.
    pub fn store_count(&self) -> usize {
        self.store_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    async fn fetch(&self, container: &str, key: &str) -> Result<Bytes, StorageError> {
        self.get(container, key)
            .await
            .ok_or_else(|| StorageError::NotFound(format!("memory://{}/{}", container, key)))
    }

    async fn store(&self, data: Bytes, key: &str, container: &str) -> Result<(), StorageError> {
        self.insert(container, key, data).await;
        self.store_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}
