//! Device identity and session authority.
//!
//! Embedded devices register themselves, get claimed by an end user through
//! a short-lived token handed over by the companion app, and then obtain
//! signed session credentials kept alive by heartbeats.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod model;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use config::{Config, StoreBackend};
use db::{Bounded, MemoryStore, RocksStore, Store};

/// Opens the configured backend behind the timeout decorator.
pub fn open_store(config: &Config) -> Result<Store> {
    let store: Store = match &config.store {
        StoreBackend::Memory => {
            info!("using in-memory document store; state is lost on restart");
            Arc::new(Bounded::new(MemoryStore::new(), config.store_timeout))
        }
        StoreBackend::RocksDb(path) => Arc::new(Bounded::new(
            RocksStore::open(path)?,
            config.store_timeout,
        )),
    };
    Ok(store)
}
