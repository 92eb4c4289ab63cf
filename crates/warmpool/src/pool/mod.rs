//! The warm pool of unassigned VMs.
//!
//! A background loop keeps at least `target_size` free VMs around and feeds
//! them into a bounded channel. Users claim VMs from that channel by writing
//! their identity into the instance metadata, guarded by the metadata
//! fingerprint so that two requests can never claim the same VM. The same
//! loop deletes VMs that have been idle, assigned, or unclaimed for too long.

mod provision;
mod reclaim;

pub use reclaim::{ReclaimReason, reclaim_reason, too_old_vms};

use crate::config::PoolConfig;
use crate::ops;
use crate::proxy::BackendRegistry;
use chrono::{SecondsFormat, Utc};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warmpool_core::{
    ComputeApi, Error, FOR_USER_KEY, FOR_USER_TIMESTAMP_KEY, Instance, Result,
    wait_for_zone_operation,
};

/// Whether a failed claim says nothing about the VM itself, so it may still
/// be free. Lost races and vanished VMs are not retried.
fn is_transient_claim_error(e: &Error) -> bool {
    !matches!(
        e,
        Error::FingerprintMismatch(_) | Error::InvalidInstance { .. } | Error::NotFound { .. }
    )
}

struct Inner {
    compute: Arc<dyn ComputeApi>,
    registry: Arc<dyn BackendRegistry>,
    config: PoolConfig,
    free_tx: mpsc::Sender<Instance>,
    free_rx: tokio::sync::Mutex<mpsc::Receiver<Instance>>,
    /// Names already pushed into the channel, so repeated fills don't queue
    /// the same VM twice.
    offered: Mutex<LruCache<String, ()>>,
}

/// Handle to the pool. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct VmPool {
    inner: Arc<Inner>,
}

impl VmPool {
    /// Creates the pool and fills it once before returning.
    pub async fn new(
        compute: Arc<dyn ComputeApi>,
        registry: Arc<dyn BackendRegistry>,
        config: PoolConfig,
    ) -> Result<Self> {
        config.validate()?;
        let seen = NonZeroUsize::new(config.seen_capacity)
            .ok_or_else(|| Error::InvalidConfig("dedup capacity must be at least 1".into()))?;
        let (free_tx, free_rx) = mpsc::channel(config.channel_capacity);

        let pool = Self {
            inner: Arc::new(Inner {
                compute,
                registry,
                config,
                free_tx,
                free_rx: tokio::sync::Mutex::new(free_rx),
                offered: Mutex::new(LruCache::new(seen)),
            }),
        };

        let free = pool.fill().await?;
        pool.offer(free);
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn compute(&self) -> &Arc<dyn ComputeApi> {
        &self.inner.compute
    }

    /// Managed, unassigned VMs, oldest first.
    pub async fn free_vms(&self) -> Result<Vec<Instance>> {
        let mut free: Vec<Instance> = self
            .inner
            .compute
            .list_instances()
            .await?
            .into_iter()
            .filter(|vm| vm.is_managed() && vm.is_unassigned())
            .collect();
        free.sort_by_key(|vm| vm.creation_timestamp);
        Ok(free)
    }

    /// Creates VMs until at least `target_size` are free, returning all of
    /// them. Never deletes surplus VMs.
    pub async fn fill(&self) -> Result<Vec<Instance>> {
        let mut free = self.free_vms().await?;
        let target = self.inner.config.target_size;
        if free.len() >= target {
            return Ok(free);
        }

        let missing = target - free.len();
        info!(free = free.len(), target, missing, "filling pool");
        for _ in 0..missing {
            free.push(self.create_vm().await?);
        }
        Ok(free)
    }

    /// Queues VMs that have not been queued before. Returns how many were
    /// queued.
    ///
    /// Stops at the first VM that does not fit; it stays unmarked and will
    /// be offered again on a later fill.
    fn offer(&self, vms: Vec<Instance>) -> usize {
        let mut offered = match self.inner.offered.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut queued = 0;
        for vm in vms {
            if offered.contains(&vm.name) {
                continue;
            }
            let name = vm.name.clone();
            match self.inner.free_tx.try_send(vm) {
                Ok(()) => {
                    offered.put(name, ());
                    queued += 1;
                }
                Err(TrySendError::Full(_)) => {
                    debug!(instance = %name, "free VM channel full");
                    break;
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }
        queued
    }

    /// Claims a free VM for `user`.
    ///
    /// Candidates come from the channel; each one is re-read and claimed with
    /// a fingerprint-guarded metadata write, so a VM claimed elsewhere in the
    /// meantime is skipped. Gives up after `claim_attempts` failed claims, or
    /// when no candidate shows up within `claim_timeout`.
    pub async fn wait_for_vm(&self, user: &str) -> Result<Instance> {
        let attempts = self.inner.config.claim_attempts;
        for attempt in 1..=attempts {
            let candidate = self.next_candidate().await?;
            match self.claim(&candidate.name, user).await {
                Ok(vm) => {
                    info!(instance = %vm.name, user, attempt, "claimed VM");
                    return Ok(vm);
                }
                Err(e) => {
                    warn!(instance = %candidate.name, user, attempt, error = %e, "failed to claim VM");
                    if is_transient_claim_error(&e) {
                        self.forget(&candidate.name);
                    }
                }
            }
        }
        Err(Error::PoolExhausted(attempts))
    }

    /// Lets a later fill offer `name` again.
    fn forget(&self, name: &str) {
        let mut offered = match self.inner.offered.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        offered.pop(name);
    }

    async fn next_candidate(&self) -> Result<Instance> {
        let timeout = self.inner.config.claim_timeout;
        let receive = async {
            let mut rx = self.inner.free_rx.lock().await;
            rx.recv().await
        };
        match tokio::time::timeout(timeout, receive).await {
            Ok(Some(vm)) => Ok(vm),
            Ok(None) => Err(Error::PoolShutdown),
            Err(_) => Err(Error::Timeout(format!(
                "no free VM became available within {timeout:?}"
            ))),
        }
    }

    async fn claim(&self, name: &str, user: &str) -> Result<Instance> {
        let compute = &self.inner.compute;
        let current = compute.get_instance(name).await?;
        if !current.is_unassigned() {
            return Err(Error::InvalidInstance {
                name: current.name,
                reason: "already claimed".to_string(),
            });
        }

        let mut metadata = current.metadata;
        metadata.set(FOR_USER_KEY, user);
        metadata.set(
            FOR_USER_TIMESTAMP_KEY,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        let op = compute.set_metadata(name, &metadata).await?;
        wait_for_zone_operation(compute.as_ref(), &op.name, self.inner.config.operation_poll())
            .await?;

        compute.get_instance(name).await
    }

    /// Deletes pooled VMs that are idle or past their age limits. Returns
    /// how many were deleted.
    pub async fn kill_old_vms(&self, idle_backends: &[String]) -> Result<usize> {
        let vms = self.inner.compute.list_instances().await?;
        let idle: HashSet<&str> = idle_backends.iter().map(String::as_str).collect();
        let now = Utc::now();

        let mut deleted = 0;
        for vm in &vms {
            let Some(reason) = reclaim_reason(vm, &idle, now, &self.inner.config.limits) else {
                continue;
            };
            info!(instance = %vm.name, user = vm.for_user(), %reason, "reclaiming VM");
            self.delete_vm(vm).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Deletes a VM and the service accounts it runs as.
    pub async fn delete_vm(&self, vm: &Instance) -> Result<()> {
        let compute = &self.inner.compute;
        ops::delete_instance(
            Arc::clone(compute),
            vm.name.clone(),
            self.inner.config.operation_poll(),
        )
        .await?;

        // Every account gets a delete attempt; the first failure is reported.
        let mut first_err = None;
        for account in &vm.service_accounts {
            match compute.delete_service_account(&account.email).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(account = %account.email, "service account already gone");
                }
                Err(e) => {
                    warn!(account = %account.email, error = %e, "failed to delete service account");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                debug!(instance = %vm.name, "deleted VM");
                Ok(())
            }
        }
    }

    /// One round of upkeep: refill, then reclaim. Failures are logged so a
    /// flaky API call doesn't stop the loop.
    pub async fn maintain(&self) {
        match self.fill().await {
            Ok(free) => {
                let queued = self.offer(free);
                if queued > 0 {
                    debug!(queued, "queued free VMs");
                }
            }
            Err(e) => warn!(error = %e, "failed to fill pool"),
        }

        let idle = match self
            .inner
            .registry
            .idle_backends(self.inner.config.limits.idle)
            .await
        {
            Ok(idle) => idle,
            Err(e) => {
                warn!(error = %e, "failed to query idle backends");
                Vec::new()
            }
        };
        if let Err(e) = self.kill_old_vms(&idle).await {
            warn!(error = %e, "failed to reclaim VMs");
        }
    }

    /// Runs [`maintain`](Self::maintain) every `maintenance_interval` until
    /// `cancel` fires.
    pub fn spawn_maintenance(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        let interval = pool.inner.config.maintenance_interval;
        tokio::spawn(async move {
            info!(?interval, "pool maintenance started");
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = pool.maintain() => {}
                }
            }
            info!("pool maintenance stopped");
        })
    }
}
