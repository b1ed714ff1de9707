// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync layer.
//!
//! # Example
//!
//! ```
//! use fastlandz_sync::SyncConfig;
//!
//! let config = SyncConfig::default();
//! assert_eq!(config.max_retries, 3);
//! assert_eq!(config.periodic_sync_secs, 30);
//!
//! let config = SyncConfig {
//!     local_store_path: Some("./fastlandz.db".into()),
//!     periodic_sync_secs: 10,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the sync layer.
///
/// All fields have defaults matching the app's production behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Local storage key holding the serialized queue
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Failed attempts before an operation is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Periodic drain interval while online
    #[serde(default = "default_periodic_sync_secs")]
    pub periodic_sync_secs: u64,

    /// Consecutive transient remote failures before the monitor reports offline
    #[serde(default = "default_offline_failure_threshold")]
    pub offline_failure_threshold: u32,

    /// SQLite file for the durable local store (None = in-memory)
    #[serde(default)]
    pub local_store_path: Option<String>,
}

fn default_queue_key() -> String { "fastlandz_sync_queue".to_string() }
fn default_max_retries() -> u32 { 3 }
fn default_periodic_sync_secs() -> u64 { 30 }
fn default_offline_failure_threshold() -> u32 { 3 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_key: default_queue_key(),
            max_retries: default_max_retries(),
            periodic_sync_secs: default_periodic_sync_secs(),
            offline_failure_threshold: default_offline_failure_threshold(),
            local_store_path: None,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_sync_secs.max(1))
    }
}
