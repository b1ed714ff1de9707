// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage collaborators: the remote row store and the durable local store.

pub mod traits;
pub mod memory;
pub mod sql;

pub use traits::{Filter, LocalStore, RemoteError, RemoteStore, Row, StorageError};

use std::sync::Arc;

use tracing::info;

use crate::config::SyncConfig;

/// Local store selected by `config.local_store_path`: SQLite when set,
/// in-memory otherwise.
pub async fn open_local_store(config: &SyncConfig) -> Result<Arc<dyn LocalStore>, StorageError> {
    match &config.local_store_path {
        Some(path) => Ok(Arc::new(sql::SqliteLocalStore::open(path).await?)),
        None => {
            info!("No local store path configured, queue will not survive restarts");
            Ok(Arc::new(memory::MemoryLocalStore::new()))
        }
    }
}
