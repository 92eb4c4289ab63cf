//! Pairing users with VMs.

use crate::cloud_init::USER_DISK_DEVICE;
use crate::compensation::Compensation;
use crate::disk::DiskManager;
use crate::pool::VmPool;
use crate::proxy::BackendRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warmpool_core::{Disk, Error, Instance, Result, wait_for_zone_operation};

/// Gives each user a running VM with their disk attached.
pub struct Assigner {
    disks: Arc<DiskManager>,
    pool: VmPool,
    registry: Arc<dyn BackendRegistry>,
}

impl Assigner {
    pub fn new(disks: Arc<DiskManager>, pool: VmPool, registry: Arc<dyn BackendRegistry>) -> Self {
        Self {
            disks,
            pool,
            registry,
        }
    }

    /// Returns the VM the user's disk is attached to, claiming a free VM and
    /// attaching the disk if there is none.
    ///
    /// A claimed VM whose attach fails is deleted, since it already carries
    /// the user's name, and the next attempt claims another one.
    pub async fn get_or_create_vm(&self, user: &str) -> Result<Instance> {
        let attempts = self.pool.config().assign_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let disk = self.disks.get_for_user(user).await?;
            if let Some(owner) = disk.attached_instance() {
                debug!(user, instance = owner, disk = %disk.name, "disk already attached");
                return self.pool.compute().get_instance(owner).await;
            }

            let vm = self.pool.wait_for_vm(user).await?;
            let mut undo = Compensation::new();
            let pool = self.pool.clone();
            let claimed = vm.clone();
            undo.push(format!("delete claimed VM {}", vm.name), async move {
                pool.delete_vm(&claimed).await
            });

            match self.attach(&vm, &disk).await {
                Ok(vm) => {
                    undo.commit();
                    info!(user, instance = %vm.name, disk = %disk.name, "attached user disk");
                    return Ok(vm);
                }
                Err(e) => {
                    warn!(user, instance = %vm.name, attempt, error = %e, "failed to attach user disk");
                    undo.rollback().await;
                    last_error = Some(e);
                }
            }
        }

        Err(Error::Provisioning(format!(
            "could not attach disk for {user} after {attempts} attempts: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn attach(&self, vm: &Instance, disk: &Disk) -> Result<Instance> {
        let compute = self.pool.compute();
        let op = compute
            .attach_disk(&vm.name, &disk.name, USER_DISK_DEVICE)
            .await?;
        wait_for_zone_operation(compute.as_ref(), &op.name, self.pool.config().operation_poll())
            .await?;
        compute.get_instance(&vm.name).await
    }

    /// Finds or prepares the user's VM and routes the user to it.
    pub async fn assign(&self, user: &str) -> Result<Instance> {
        let vm = self.get_or_create_vm(user).await?;
        self.registry.register_backend(&vm, user).await?;
        Ok(vm)
    }
}
