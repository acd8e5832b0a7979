//! In-process backend, used for local runs and tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{DocumentStore, StoreError, Transaction, Write};

type Collection = BTreeMap<String, Value>;

#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let data = self.data.read().await;
        Ok(data.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn set(&self, collection: &str, id: &str, record: Value) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        data.entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), record);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        if let Some(c) = data.get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .get(collection)
            .map(|c| {
                c.values()
                    .filter(|doc| doc.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        // Held across check and apply; no other writer can interleave.
        let mut data = self.data.write().await;

        txn.check(|collection, id| {
            Ok(data.get(collection).and_then(|c| c.get(id)).cloned())
        })?;

        for write in txn.writes {
            match write {
                Write::Set {
                    collection,
                    id,
                    record,
                } => {
                    data.entry(collection).or_default().insert(id, record);
                }
                Write::Delete { collection, id } => {
                    if let Some(c) = data.get_mut(&collection) {
                        c.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}
