use crate::error::Result;
use crate::types::{Disk, DiskSpec, Instance, InstanceSpec, Metadata, Operation, ServiceAccount, Snapshot};
use async_trait::async_trait;

/// The provisioning API the pool manager drives.
///
/// An implementation is bound to a single project and zone. Mutating calls
/// return a long-running [`Operation`] that callers poll with
/// [`wait_for_zone_operation`](crate::wait::wait_for_zone_operation).
///
/// Lookups of missing resources must fail with
/// [`Error::NotFound`](crate::Error::NotFound); callers rely on that to tell
/// absence apart from other failures.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    fn project(&self) -> &str;
    fn zone(&self) -> &str;

    async fn get_instance(&self, name: &str) -> Result<Instance>;
    async fn list_instances(&self) -> Result<Vec<Instance>>;
    async fn insert_instance(&self, spec: &InstanceSpec) -> Result<Operation>;
    async fn delete_instance(&self, name: &str) -> Result<Operation>;

    /// Replaces the instance metadata. `metadata.fingerprint` must be the
    /// fingerprint last read; a stale one fails with
    /// [`Error::FingerprintMismatch`](crate::Error::FingerprintMismatch).
    async fn set_metadata(&self, instance: &str, metadata: &Metadata) -> Result<Operation>;

    async fn attach_disk(&self, instance: &str, disk: &str, device_name: &str)
    -> Result<Operation>;

    async fn get_disk(&self, name: &str) -> Result<Disk>;
    async fn insert_disk(&self, spec: &DiskSpec) -> Result<Operation>;
    async fn delete_disk(&self, name: &str) -> Result<Operation>;

    async fn get_snapshot(&self, name: &str) -> Result<Snapshot>;
    async fn create_snapshot(&self, disk: &str, snapshot: &str) -> Result<Operation>;

    async fn get_zone_operation(&self, name: &str) -> Result<Operation>;

    async fn create_service_account(
        &self,
        account_id: &str,
        display_name: &str,
    ) -> Result<ServiceAccount>;
    async fn delete_service_account(&self, email: &str) -> Result<()>;
}
