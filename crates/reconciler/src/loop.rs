//! Continuous reconciliation loop.
//!
//! One worker task per group re-runs passes forever: after a completed pass
//! it waits the pass's requeue delay, after a failed pass an exponential
//! backoff. A periodic resync discovers new groups; a worker whose group has
//! been deleted exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use depgroup_core::ObjectKey;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::reconciler::Reconciler;

type Registry = Arc<Mutex<HashMap<ObjectKey, Arc<Notify>>>>;

/// Drives passes for every group in the group store.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    config: ControllerConfig,
    cancel: CancellationToken,
    registry: Registry,
    resync_now: Arc<Notify>,
}

/// Handle for waking and stopping a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    cancel: CancellationToken,
    registry: Registry,
    resync_now: Arc<Notify>,
}

impl ControllerHandle {
    /// Run a pass for `key` now instead of waiting for its requeue delay.
    ///
    /// Returns `false` when no worker owns the key yet; a resync is started
    /// instead so a new group gets picked up.
    pub async fn trigger(&self, key: &ObjectKey) -> bool {
        let wake = self.registry.lock().await.get(key).cloned();
        match wake {
            Some(wake) => {
                wake.notify_one();
                true
            }
            None => {
                self.resync_now.notify_one();
                false
            }
        }
    }

    /// Stop every worker. In-flight passes stop before their next store call.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Controller {
    /// Create a controller.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` for an unusable configuration.
    pub fn new(reconciler: Arc<Reconciler>, config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reconciler,
            config,
            cancel: CancellationToken::new(),
            registry: Arc::new(Mutex::new(HashMap::new())),
            resync_now: Arc::new(Notify::new()),
        })
    }

    /// Get a handle to this controller.
    #[must_use]
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            cancel: self.cancel.clone(),
            registry: Arc::clone(&self.registry),
            resync_now: Arc::clone(&self.resync_now),
        }
    }

    /// Run until shutdown, then wait for every worker to finish.
    pub async fn run(self) {
        info!(
            resync_ms = self.config.resync_interval.as_millis(),
            "Starting controller"
        );

        let mut workers = JoinSet::new();
        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = resync.tick() => self.resync(&mut workers).await,
                () = self.resync_now.notified() => self.resync(&mut workers).await,
                Some(joined) = workers.join_next() => log_join(joined),
            }
        }

        info!(workers = workers.len(), "Controller stopping");
        while let Some(joined) = workers.join_next().await {
            log_join(joined);
        }
        info!("Controller stopped");
    }

    /// List groups and start a worker for each one without a worker.
    async fn resync(&self, workers: &mut JoinSet<()>) {
        let limit = self.reconciler.config().store_timeout;
        let listed = tokio::time::timeout(limit, self.reconciler.group_store().list())
            .await
            .unwrap_or_else(|_| {
                Err(Error::timeout(
                    "list groups",
                    "*",
                    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                ))
            });
        let keys = match listed {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Group resync failed");
                return;
            }
        };

        let mut registry = self.registry.lock().await;
        for key in keys {
            if registry.contains_key(&key) {
                continue;
            }
            debug!(group = %key, "Starting worker");
            let wake = Arc::new(Notify::new());
            registry.insert(key.clone(), Arc::clone(&wake));
            workers.spawn(worker(
                Arc::clone(&self.reconciler),
                key,
                self.config.clone(),
                wake,
                self.cancel.clone(),
                Arc::clone(&self.registry),
            ));
        }
    }
}

/// Pass loop for one group.
async fn worker(
    reconciler: Arc<Reconciler>,
    key: ObjectKey,
    config: ControllerConfig,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    registry: Registry,
) {
    let mut failures: u32 = 0;

    loop {
        let delay = match reconciler.reconcile(&key, &cancel).await {
            Ok(result) => {
                failures = 0;
                match result.requeue_after {
                    Some(delay) => delay,
                    None => break,
                }
            }
            Err(Error::Cancelled) => break,
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = config.backoff(failures);
                warn!(
                    group = %key,
                    error = %e,
                    attempt = failures,
                    retry_ms = millis(delay),
                    "Pass failed, backing off"
                );
                delay
            }
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
            () = wake.notified() => debug!(group = %key, "Pass triggered"),
        }
    }

    registry.lock().await.remove(&key);
    debug!(group = %key, "Worker stopped");
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Worker task failed");
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
