//! Key-document persistence port.
//!
//! Records are JSON documents addressed by `(collection, id)`. Backends are
//! interchangeable behind [`DocumentStore`]; the authority only ever holds an
//! `Arc<dyn DocumentStore>`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

pub const CLAIM_TOKENS: &str = "claim_tokens";
pub const DEVICE_REGISTRATIONS: &str = "device_registrations";
pub const USER_DEVICE_BINDINGS: &str = "user_device_bindings";
pub const DEVICE_SESSIONS: &str = "device_sessions";

pub type Store = Arc<dyn DocumentStore>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store call exceeded {0:?}")]
    Timeout(Duration),
    #[error("transaction precondition failed on {collection}/{id}")]
    Conflict { collection: String, id: String },
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("malformed record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

// ============================================================
// TRANSACTIONS
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// No record may exist under the key.
    Absent { collection: String, id: String },
    /// The record must exist and `field` must equal `value`.
    FieldEquals {
        collection: String,
        id: String,
        field: String,
        value: Value,
    },
}

impl Precondition {
    pub fn key(&self) -> (&str, &str) {
        match self {
            Self::Absent { collection, id } | Self::FieldEquals { collection, id, .. } => {
                (collection, id)
            }
        }
    }

    pub fn holds(&self, current: Option<&Value>) -> bool {
        match self {
            Self::Absent { .. } => current.is_none(),
            Self::FieldEquals { field, value, .. } => {
                current.and_then(|doc| doc.get(field)) == Some(value)
            }
        }
    }

    fn conflict(&self) -> StoreError {
        let (collection, id) = self.key();
        StoreError::Conflict {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Set {
        collection: String,
        id: String,
        record: Value,
    },
    Delete { collection: String, id: String },
}

/// All-or-nothing unit: every precondition is checked and every write applied
/// without another commit interleaving.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub preconditions: Vec<Precondition>,
    pub writes: Vec<Write>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_absent(mut self, collection: &str, id: &str) -> Self {
        self.preconditions.push(Precondition::Absent {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn require_field(mut self, collection: &str, id: &str, field: &str, value: Value) -> Self {
        self.preconditions.push(Precondition::FieldEquals {
            collection: collection.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            value,
        });
        self
    }

    pub fn set(mut self, collection: &str, id: &str, record: Value) -> Self {
        self.writes.push(Write::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            record,
        });
        self
    }

    pub fn delete(mut self, collection: &str, id: &str) -> Self {
        self.writes.push(Write::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn merge(mut self, other: Transaction) -> Self {
        self.preconditions.extend(other.preconditions);
        self.writes.extend(other.writes);
        self
    }

    /// First precondition that does not hold, according to `lookup`.
    pub fn check<F>(&self, mut lookup: F) -> Result<(), StoreError>
    where
        F: FnMut(&str, &str) -> Result<Option<Value>, StoreError>,
    {
        for pre in &self.preconditions {
            let (collection, id) = pre.key();
            if !pre.holds(lookup(collection, id)?.as_ref()) {
                return Err(pre.conflict());
            }
        }
        Ok(())
    }
}

// ============================================================
// PORT
// ============================================================

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, collection: &str, id: &str, record: Value) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StoreError>;

    async fn scan(&self, collection: &str) -> Result<Vec<Value>, StoreError>;

    /// Fails with [`StoreError::Conflict`] and applies nothing when any
    /// precondition does not hold.
    async fn commit(&self, txn: Transaction) -> Result<(), StoreError>;

    async fn compare_and_set(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: Value,
        record: Value,
    ) -> Result<(), StoreError> {
        self.commit(
            Transaction::new()
                .require_field(collection, id, field, expected)
                .set(collection, id, record),
        )
        .await
    }
}

pub async fn load<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>, StoreError> {
    store
        .get(collection, id)
        .await?
        .map(serde_json::from_value)
        .transpose()
        .map_err(StoreError::from)
}

pub fn to_record<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

pub fn from_records<T: DeserializeOwned>(records: Vec<Value>) -> Result<Vec<T>, StoreError> {
    records
        .into_iter()
        .map(|r| serde_json::from_value(r).map_err(StoreError::from))
        .collect()
}

// ============================================================
// TIMEOUT DECORATOR
// ============================================================

/// Applies a deadline to every call of the wrapped store.
pub struct Bounded<S> {
    inner: S,
    limit: Duration,
}

impl<S> Bounded<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn run<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.limit, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.limit))?
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for Bounded<S> {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.run(self.inner.get(collection, id)).await
    }

    async fn set(&self, collection: &str, id: &str, record: Value) -> Result<(), StoreError> {
        self.run(self.inner.set(collection, id, record)).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.run(self.inner.delete(collection, id)).await
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StoreError> {
        self.run(self.inner.find_by_field(collection, field, value))
            .await
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        self.run(self.inner.scan(collection)).await
    }

    async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        self.run(self.inner.commit(txn)).await
    }
}
