//! In-process document store with the managed store's index rules.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::store::{CollectionQuery, DocumentStore, RawDocument, Snapshot, SnapshotStream, StoreError};

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, RawDocument>>,
    indexes: HashSet<(String, String)>,
    versions: HashMap<String, watch::Sender<u64>>,
}

impl Inner {
    fn version_channel(&mut self, collection: &str) -> &watch::Sender<u64> {
        self.versions
            .entry(collection.to_string())
            .or_insert_with(|| watch::channel(0).0)
    }

    fn check_index(&self, query: &CollectionQuery) -> Result<(), StoreError> {
        match &query.order_by {
            Some(order)
                if !self
                    .indexes
                    .contains(&(query.collection.clone(), order.field.clone())) =>
            {
                Err(StoreError::missing_index(&query.collection, &order.field))
            }
            _ => Ok(()),
        }
    }

    fn evaluate(&self, query: &CollectionQuery) -> Snapshot {
        let documents = self
            .collections
            .get(&query.collection)
            .map(|docs| docs.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        query.evaluate(documents)
    }
}

/// Cloning shares the underlying collections.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a writer panicked mid-update; the maps
        // themselves are still structurally valid.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Declare an index so ordered queries on `field` are accepted.
    pub fn ensure_index(&self, collection: &str, field: &str) {
        self.lock()
            .indexes
            .insert((collection.to_string(), field.to_string()));
    }

    pub fn upsert(&self, collection: &str, id: &str, data: Value) {
        let mut inner = self.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), RawDocument::new(id, data));
        inner.version_channel(collection).send_modify(|v| *v += 1);
    }

    pub fn remove(&self, collection: &str, id: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            inner.version_channel(collection).send_modify(|v| *v += 1);
        }
        removed
    }

    pub fn len(&self, collection: &str) -> usize {
        self.lock().collections.get(collection).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subscribe(&self, query: &CollectionQuery) -> Result<SnapshotStream, StoreError> {
        let mut changes = {
            let mut inner = self.lock();
            inner.check_index(query)?;
            inner.version_channel(&query.collection).subscribe()
        };
        debug!(%query, "memory listener opened");

        let store = self.clone();
        let query = query.clone();
        let stream = async_stream::stream! {
            let initial = store.lock().evaluate(&query);
            yield Ok::<_, StoreError>(initial);
            while changes.changed().await.is_ok() {
                let snapshot = store.lock().evaluate(&query);
                yield Ok(snapshot);
            }
        };
        Ok(stream.boxed())
    }

    async fn query(&self, query: &CollectionQuery) -> Result<Snapshot, StoreError> {
        let inner = self.lock();
        inner.check_index(query)?;
        Ok(inner.evaluate(query))
    }
}
