//! # Fastlandz Sync
//!
//! Offline-first write path for the Fastlandz 7-day fasting challenge.
//!
//! ## Architecture
//!
//! Domain writes are applied to local state first, then written through to
//! the remote store or buffered in a durable queue:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Mutators                        │
//! │  • ProgressTracker / JournalTracker / FastSessionTracker    │
//! │  • Optimistic apply, rollback on application errors         │
//! └─────────────────────────────────────────────────────────────┘
//!              │ online                      │ offline or transient error
//!              ▼                             ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │      RemoteStore         │   │       OperationQueue         │
//! │  (direct write)          │   │  • JSON list in LocalStore   │
//! └──────────────────────────┘   │  • FIFO, survives restarts   │
//!              ▲                 └──────────────────────────────┘
//!              │                             │
//!              │          ┌──────────────────┘
//!              │          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SyncEngine                           │
//! │  • Serialized drain passes, bounded retries (3)             │
//! │  • OperationProcessor: one remote call per operation        │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ reconnect / 30 s tick
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ConnectivityWatcher                       │
//! │  • Listens to the NetworkMonitor, owns the periodic timer   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fastlandz_sync::{
//!     migrate_local_data, needs_migration, ConnectivityWatcher, NetworkMonitor,
//!     OperationProcessor, OperationQueue, ProgressPatch, ProgressTracker, SyncConfig,
//!     SyncContext, SyncEngine,
//!     storage::{memory::MemoryRemoteStore, open_local_store},
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig {
//!         local_store_path: Some("./fastlandz.db".into()),
//!         ..Default::default()
//!     };
//!
//!     let local = open_local_store(&config).await.expect("local store");
//!     let remote = Arc::new(MemoryRemoteStore::new());
//!     let monitor = Arc::new(NetworkMonitor::with_threshold(true, config.offline_failure_threshold));
//!     let queue = Arc::new(OperationQueue::with_key(local.clone(), config.queue_key.clone()));
//!
//!     let engine = Arc::new(SyncEngine::new(
//!         queue.clone(),
//!         OperationProcessor::new(remote.clone()),
//!         monitor.clone(),
//!         &config,
//!     ));
//!     let watcher = ConnectivityWatcher::spawn(engine.clone(), &config);
//!
//!     let ctx = Arc::new(
//!         SyncContext::new(local, queue, monitor)
//!             .with_remote(remote)
//!             .with_user("user-1"),
//!     );
//!     if needs_migration(&ctx).await {
//!         let result = migrate_local_data(&ctx).await;
//!         println!("migrated cleanly: {}", result.is_success());
//!     }
//!     let progress = ProgressTracker::load(ctx).await;
//!     progress.update(ProgressPatch::current_day(3)).await.expect("write");
//!
//!     watcher.teardown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`connectivity`]: Online/offline oracle with change notifications
//! - [`queue`]: Durable FIFO of [`QueuedOperation`]s
//! - [`processor`]: Maps one operation to one remote call
//! - [`coordinator`]: The [`SyncEngine`] drain loop
//! - [`watcher`]: Reconnect and periodic triggers
//! - [`mutators`]: Domain trackers and the post-sign-in upload of local data
//! - [`storage`]: Remote and local store traits plus implementations
//! - [`resilience`]: Retry with backoff for opening the local store

pub mod config;
pub mod operation;
pub mod storage;
pub mod resilience;
pub mod queue;
pub mod processor;
pub mod connectivity;
pub mod coordinator;
pub mod watcher;
pub mod mutators;
pub mod metrics;

pub use config::SyncConfig;
pub use operation::{OperationKind, OperationState, QueuedOperation, Settled};
pub use queue::{OperationQueue, QueueStatus};
pub use processor::{FailureReason, OperationProcessor, ProcessOutcome};
pub use connectivity::{Connectivity, NetworkMonitor};
pub use coordinator::{DrainResult, SyncEngine, SyncState, SyncStats};
pub use watcher::{ConnectivityWatcher, WatcherHandle};
pub use mutators::{MutationError, SyncContext, WriteOutcome};
pub use mutators::progress::{ProgressPatch, ProgressTracker, UserProgress};
pub use mutators::journal::{JournalEntry, JournalPatch, JournalTracker};
pub use mutators::fast_session::{FastPatch, FastSessionTracker, FastState};
pub use mutators::migration::{
    migrate_local_data, needs_migration, MigrationError, MigrationPart, MigrationResult,
};
pub use storage::{LocalStore, RemoteError, RemoteStore, StorageError};
pub use resilience::retry::RetryConfig;
