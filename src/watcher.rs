// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Decides when the sync engine drains.
//!
//! A background task reacts to two triggers:
//! - an offline → online transition runs one full [`SyncEngine::drain`];
//! - a periodic tick (30 s by default) runs [`SyncEngine::try_drain`] while
//!   online, but only if the queue has anything in it. While offline the tick
//!   probes the remote store instead, so a client that went offline after a
//!   run of failed calls comes back on its own.
//!
//! The returned [`WatcherHandle`] owns the task. Call
//! [`WatcherHandle::teardown`] on shutdown; dropping the handle aborts the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::coordinator::{DrainResult, SyncEngine};
use crate::storage::StorageError;

pub struct ConnectivityWatcher;

impl ConnectivityWatcher {
    /// Start watching. Must be called from within a tokio runtime.
    pub fn spawn(engine: Arc<SyncEngine>, config: &SyncConfig) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (result_tx, result_rx) = watch::channel(None);
        let period = config.periodic_interval();

        let task = tokio::spawn(run(engine, period, shutdown_rx, result_tx));
        info!(period = ?period, "Connectivity watcher started");

        WatcherHandle {
            shutdown: shutdown_tx,
            task: Some(task),
            results: result_rx,
        }
    }
}

/// Owner of the watcher task.
pub struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    results: watch::Receiver<Option<DrainResult>>,
}

impl WatcherHandle {
    /// Result of the most recent pass the watcher triggered.
    #[must_use]
    pub fn last_result(&self) -> Option<DrainResult> {
        *self.results.borrow()
    }

    /// Receiver notified after every pass the watcher triggers.
    #[must_use]
    pub fn results(&self) -> watch::Receiver<Option<DrainResult>> {
        self.results.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the transition listener and the periodic timer, waiting for a
    /// pass in flight to finish.
    pub async fn teardown(mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown.send(true);
            if let Err(e) = task.await {
                warn!(error = %e, "Connectivity watcher task ended abnormally");
            }
            info!("Connectivity watcher stopped");
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    engine: Arc<SyncEngine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    results: watch::Sender<Option<DrainResult>>,
) {
    let mut online_rx = engine.connectivity().subscribe();
    let mut was_online = *online_rx.borrow_and_update();
    crate::metrics::set_online(was_online);

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            changed = online_rx.changed() => {
                if changed.is_err() {
                    debug!("Connectivity source closed, watcher exiting");
                    break;
                }
                let online = *online_rx.borrow_and_update();
                crate::metrics::set_online(online);

                if online && !was_online {
                    info!("Back online, processing sync queue");
                    publish(&results, engine.drain().await);
                } else if !online && was_online {
                    info!("Gone offline, operations will be queued");
                }
                was_online = online;
            }

            _ = ticker.tick() => {
                if !engine.connectivity().is_online() {
                    if engine.probe().await {
                        debug!("Probe reached the remote store");
                    }
                    continue;
                }
                match engine.queue().is_empty().await {
                    Ok(true) => {}
                    Ok(false) => {
                        if let Some(result) = engine.try_drain().await {
                            publish(&results, result);
                        }
                    }
                    Err(e) => warn!(error = %e, "Periodic sync could not read queue"),
                }
            }
        }
    }
}

fn publish(results: &watch::Sender<Option<DrainResult>>, result: Result<DrainResult, StorageError>) {
    match result {
        Ok(r) => {
            if r.processed > 0 {
                info!(processed = r.processed, "Synced queued operations");
            }
            if r.failed > 0 {
                warn!(failed = r.failed, "Operations failed after max retries");
            }
            results.send_replace(Some(r));
        }
        Err(e) => warn!(error = %e, "Drain failed on local storage"),
    }
}
