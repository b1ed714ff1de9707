// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Network reachability.
//!
//! [`Connectivity`] is the read side used by the sync engine and the domain
//! mutators. [`NetworkMonitor`] is the implementation the host wires to its
//! platform online/offline events. It can also derive reachability from the
//! remote store itself: the sync engine and the domain mutators report every
//! remote call they make, a run of consecutive transient failures marks the
//! client offline, and one success marks it online again.
//!
//! An `is_online() == true` answer is a hint. The next remote call can still
//! fail and callers handle that on their own.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::storage::{Filter, RemoteError, RemoteStore};

pub trait Connectivity: Send + Sync {
    /// Current reachability as last reported by the runtime.
    fn is_online(&self) -> bool;

    /// Receiver that observes every online/offline transition.
    fn subscribe(&self) -> watch::Receiver<bool>;

    /// A remote call went through (or reached the server and was refused).
    fn record_success(&self) {}

    /// A remote call failed with a transient error.
    fn record_failure(&self) {}
}

/// Feed the result of a remote call into reachability tracking.
pub(crate) fn observe<T>(connectivity: &dyn Connectivity, result: &Result<T, RemoteError>) {
    match result {
        Err(e) if e.is_transient() => connectivity.record_failure(),
        _ => connectivity.record_success(),
    }
}

/// Cheapest possible round trip. A refusal still proves the server answered.
pub(crate) async fn health_check(remote: &dyn RemoteStore) -> Result<(), RemoteError> {
    remote
        .select("profiles", &[Filter::eq("id", "__health_check__")])
        .await
        .map(|_| ())
}

pub struct NetworkMonitor {
    online: watch::Sender<bool>,
    failures: AtomicU32,
    failure_threshold: u32,
    /// Prevent overlapping probes
    probing: Mutex<()>,
}

impl NetworkMonitor {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        Self::with_threshold(initially_online, Self::DEFAULT_FAILURE_THRESHOLD)
    }

    #[must_use]
    pub fn with_threshold(initially_online: bool, failure_threshold: u32) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self {
            online,
            failures: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            probing: Mutex::new(()),
        }
    }

    /// Report a platform online/offline event.
    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                self.failures.store(0, Ordering::Release);
                info!("Connectivity restored");
            } else {
                info!("Connectivity lost, writes will be queued");
            }
        }
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Ping the remote store with a cheap select and update reachability.
    pub async fn probe(&self, remote: &dyn RemoteStore) -> bool {
        let _guard = self.probing.lock().await;

        let result = health_check(remote).await;
        if let Err(e) = &result {
            if e.is_transient() {
                warn!(error = %e, "Connectivity probe failed");
            }
        }
        observe(self, &result);
        self.is_online()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for NetworkMonitor {
    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.set_online(true);
    }

    fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(failures, threshold = self.failure_threshold, "Remote call failed");
        if failures >= self.failure_threshold {
            self.set_online(false);
        }
    }
}
