//! Per-user persistent disks.
//!
//! Every user owns exactly one disk, named by [`disk_name`]. Disks are
//! restored from a golden snapshot the first time a user shows up and are
//! never deleted here, so user data outlives any VM it was attached to.

mod naming;
mod snapshot;

pub use naming::disk_name;

use crate::config::DiskConfig;
use std::sync::Arc;
use tracing::{debug, info};
use warmpool_core::{
    ComputeApi, Disk, DiskSpec, Error, Result, Snapshot, wait_for_disk_ready,
    wait_for_zone_operation,
};

/// Hands out the disk belonging to a user, creating it on first use.
pub struct DiskManager {
    compute: Arc<dyn ComputeApi>,
    config: DiskConfig,
    snapshot: Snapshot,
}

impl DiskManager {
    /// Creates a manager, building the golden snapshot if it is missing.
    pub async fn new(compute: Arc<dyn ComputeApi>, config: DiskConfig) -> Result<Self> {
        let snapshot = snapshot::ensure_snapshot(&compute, &config).await?;
        Ok(Self {
            compute,
            config,
            snapshot,
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Returns the user's disk once it is `READY`.
    ///
    /// Only a confirmed not-found leads to creation; any other lookup failure
    /// is returned as is.
    pub async fn get_for_user(&self, user: &str) -> Result<Disk> {
        let name = disk_name(user);
        match self.compute.get_disk(&name).await {
            Ok(disk) if disk.is_ready() => Ok(disk),
            Ok(disk) if disk.status.is_pending() => {
                debug!(disk = %name, status = %disk.status, "waiting for user disk");
                wait_for_disk_ready(self.compute.as_ref(), &name, self.config.operation_poll())
                    .await
            }
            Ok(disk) => Err(Error::UnexpectedStatus {
                kind: "disk",
                name,
                status: disk.status.to_string(),
            }),
            Err(e) if e.is_not_found() => self.create(user, name).await,
            Err(e) => Err(e),
        }
    }

    async fn create(&self, user: &str, name: String) -> Result<Disk> {
        info!(user, disk = %name, snapshot = %self.snapshot.name, "creating user disk");
        let poll = self.config.operation_poll();
        let spec = DiskSpec {
            name: name.clone(),
            size_gb: Some(self.config.size_gb),
            source_snapshot: Some(self.snapshot.self_link.clone()),
        };

        match self.compute.insert_disk(&spec).await {
            Ok(op) => wait_for_zone_operation(self.compute.as_ref(), &op.name, poll).await?,
            // A concurrent request for the same user won the race.
            Err(Error::Api { status: 409, .. }) => {
                debug!(disk = %name, "user disk created concurrently");
            }
            Err(e) => return Err(e),
        }

        wait_for_disk_ready(self.compute.as_ref(), &name, poll).await
    }
}
