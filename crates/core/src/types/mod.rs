mod account;
mod disk;
mod instance;
mod operation;

pub use account::ServiceAccount;
pub use disk::{Disk, DiskSpec, DiskStatus, Snapshot};
pub use instance::{
    AttachedDisk, BACKEND_ID_KEY, FOR_USER_KEY, FOR_USER_TIMESTAMP_KEY, Instance, InstanceSpec,
    InstanceStatus, Metadata, MetadataItem, ServiceAccountRef, VmState,
};
pub use operation::{Operation, OperationError, OperationStatus};

/// Returns the last path segment of a resource link.
///
/// Providers refer to resources by self-link; most calls take bare names.
pub fn resource_name(link: &str) -> &str {
    link.rsplit('/').next().unwrap_or(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_of_self_link() {
        assert_eq!(
            resource_name("https://www.googleapis.com/compute/v1/projects/p/zones/z/disks/d1"),
            "d1"
        );
    }

    #[test]
    fn resource_name_of_bare_name() {
        assert_eq!(resource_name("d1"), "d1");
    }
}
