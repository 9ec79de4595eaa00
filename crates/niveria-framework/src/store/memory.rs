//! In-memory document store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use niveria_core::{CapabilityKind, DocumentStore, EntityKey, StoreError, StoreResult, StoredDocument};
use parking_lot::RwLock;

/// Process-local store. Reachability can be toggled to simulate outages.
pub struct MemoryStore {
    name: String,
    documents: RwLock<HashMap<(EntityKey, CapabilityKind), StoredDocument>>,
    reachable: AtomicBool,
    writes: AtomicUsize,
    failed_attempts: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Creates an empty store with a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
            failed_attempts: AtomicUsize::new(0),
        }
    }

    /// Simulates the store going away (`false`) or coming back (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Current reachability.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Copy of a stored document.
    pub fn document(&self, key: &EntityKey, kind: CapabilityKind) -> Option<StoredDocument> {
        self.documents.read().get(&(key.clone(), kind)).cloned()
    }

    /// Seeds or merges a document directly, bypassing reachability.
    pub fn insert(&self, document: StoredDocument) {
        self.merge(document);
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Documents written successfully.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Document writes rejected while unreachable.
    pub fn failed_attempts(&self) -> usize {
        self.failed_attempts.load(Ordering::SeqCst)
    }

    fn merge(&self, document: StoredDocument) {
        let id = (document.key.clone(), document.kind);
        let mut documents = self.documents.write();
        match documents.get_mut(&id) {
            Some(existing) => existing.merge_lww(document),
            None => {
                documents.insert(id, document);
            }
        }
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(StoreError::unreachable(format!("{} is offline", self.name)))
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, key: &EntityKey, kind: CapabilityKind) -> StoreResult<Option<StoredDocument>> {
        self.check_reachable()?;
        Ok(self.document(key, kind))
    }

    async fn write(&self, document: StoredDocument) -> StoreResult<()> {
        if let Err(err) = self.check_reachable() {
            self.failed_attempts.fetch_add(1, Ordering::SeqCst);
            return Err(err);
        }
        self.merge(document);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<Duration> {
        self.check_reachable()?;
        Ok(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_offline_store_rejects_and_counts() {
        let store = MemoryStore::new();
        let key = EntityKey::new(uuid::Uuid::from_u128(1));
        let doc = StoredDocument::from_write(key.clone(), CapabilityKind::ProfileStore, json!({"a": 1}), Utc::now());

        store.set_reachable(false);
        assert!(matches!(store.write(doc.clone()).await, Err(StoreError::Unreachable(_))));
        assert!(store.ping().await.is_err());
        assert_eq!(store.failed_attempts(), 1);

        store.set_reachable(true);
        store.write(doc).await.unwrap();
        let loaded = store.load(&key, CapabilityKind::ProfileStore).await.unwrap();
        assert_eq!(loaded.map(|d| d.value), Some(json!({"a": 1})));
        assert_eq!(store.write_count(), 1);
    }
}
