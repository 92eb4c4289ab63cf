pub mod compute;
pub mod error;
pub mod types;
pub mod wait;

pub use compute::ComputeApi;
pub use error::{Error, Result};
pub use types::{
    AttachedDisk, BACKEND_ID_KEY, Disk, DiskSpec, DiskStatus, FOR_USER_KEY,
    FOR_USER_TIMESTAMP_KEY, Instance, InstanceSpec, InstanceStatus, Metadata, MetadataItem,
    Operation, OperationError, OperationStatus, ServiceAccount, ServiceAccountRef, Snapshot,
    VmState, resource_name,
};
pub use wait::{
    PollSettings, poll_until, wait_for_disk_ready, wait_for_instance_status,
    wait_for_zone_operation,
};
