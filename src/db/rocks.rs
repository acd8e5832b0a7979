//! Durable RocksDB backend.
//!
//! Keys are `"{collection}:{id}"`, values are JSON bytes. Every call runs on
//! the blocking pool so a caller-side timeout can actually fire.

use std::{
    path::Path,
    str,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde_json::Value;
use tokio::task;
use tracing::info;

use super::{DocumentStore, StoreError, Transaction, Write};

pub struct RocksStore {
    db: Arc<DB>,
    // Taken on the blocking thread, so an abandoned caller cannot release it early.
    write_lock: Arc<Mutex<()>>,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path.as_ref())?;
        info!(path = %path.as_ref().display(), "opened rocksdb document store");
        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn key(collection: &str, id: &str) -> String {
        format!("{collection}:{id}")
    }

    fn prefix(collection: &str) -> String {
        format!("{collection}:")
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&DB) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || f(db.as_ref())).await?
    }

    async fn blocking_write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&DB) -> Result<T, StoreError> + Send + 'static,
    {
        let lock = Arc::clone(&self.write_lock);
        self.blocking(move |db| {
            let _guard = lock
                .lock()
                .map_err(|e| StoreError::Backend(format!("write lock poisoned: {e}")))?;
            f(db)
        })
        .await
    }
}

fn read(db: &DB, key: &str) -> Result<Option<Value>, StoreError> {
    db.get(key)?
        .map(|raw| serde_json::from_slice(&raw))
        .transpose()
        .map_err(StoreError::from)
}

fn scan_prefix(db: &DB, prefix: &str) -> Result<Vec<Value>, StoreError> {
    let mut out = Vec::new();
    for item in db.iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward)) {
        let (key, val) = item?;
        let k = str::from_utf8(&key).map_err(|e| StoreError::Backend(e.to_string()))?;
        if !k.starts_with(prefix) {
            break;
        }
        out.push(serde_json::from_slice(&val)?);
    }
    Ok(out)
}

#[async_trait]
impl DocumentStore for RocksStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let key = Self::key(collection, id);
        self.blocking(move |db| read(db, &key)).await
    }

    async fn set(&self, collection: &str, id: &str, record: Value) -> Result<(), StoreError> {
        let key = Self::key(collection, id);
        let val = serde_json::to_vec(&record)?;
        self.blocking_write(move |db| Ok(db.put(key, val)?)).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let key = Self::key(collection, id);
        self.blocking_write(move |db| Ok(db.delete(key)?)).await
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StoreError> {
        let prefix = Self::prefix(collection);
        let field = field.to_string();
        let value = value.clone();
        self.blocking(move |db| {
            Ok(scan_prefix(db, &prefix)?
                .into_iter()
                .filter(|doc| doc.get(&field) == Some(&value))
                .collect())
        })
        .await
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let prefix = Self::prefix(collection);
        self.blocking(move |db| scan_prefix(db, &prefix)).await
    }

    async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        self.blocking_write(move |db| {
            txn.check(|collection, id| read(db, &RocksStore::key(collection, id)))?;

            let mut batch = WriteBatch::default();
            for write in &txn.writes {
                match write {
                    Write::Set {
                        collection,
                        id,
                        record,
                    } => batch.put(Self::key(collection, id), serde_json::to_vec(record)?),
                    Write::Delete { collection, id } => batch.delete(Self::key(collection, id)),
                }
            }
            db.write(batch)?;
            Ok(())
        })
        .await
    }
}
