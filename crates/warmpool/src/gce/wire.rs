//! JSON shapes of the Compute Engine v1 and IAM v1 REST APIs.
//!
//! Only the fields the pool reads or writes are modelled. int64 fields such
//! as `sizeGb` travel as JSON strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warmpool_core::{
    AttachedDisk, Disk, DiskStatus, Instance, InstanceStatus, Metadata, MetadataItem, Operation,
    OperationError, OperationStatus, ServiceAccount, ServiceAccountRef, Snapshot,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InstanceResource {
    pub name: String,
    #[serde(default)]
    pub self_link: String,
    pub status: String,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub disks: Vec<AttachedDiskResource>,
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccountRefResource>,
    #[serde(default)]
    pub metadata: MetadataResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttachedDiskResource {
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub boot: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ServiceAccountRefResource {
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct MetadataResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub items: Vec<MetadataItemResource>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MetadataItemResource {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InstanceList {
    #[serde(default)]
    pub items: Vec<InstanceResource>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DiskResource {
    pub name: String,
    #[serde(default)]
    pub self_link: String,
    pub status: String,
    #[serde(default)]
    pub size_gb: String,
    #[serde(default)]
    pub users: Vec<String>,
    pub source_snapshot: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SnapshotResource {
    pub name: String,
    #[serde(default)]
    pub self_link: String,
    #[serde(default)]
    pub status: String,
    pub source_disk: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OperationResource {
    pub name: String,
    pub status: String,
    pub target_link: Option<String>,
    pub error: Option<OperationErrorList>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OperationErrorList {
    #[serde(default)]
    pub errors: Vec<OperationErrorResource>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OperationErrorResource {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceAccountResource {
    pub email: String,
    #[serde(default)]
    pub unique_id: String,
    #[serde(default)]
    pub display_name: String,
}

/// Body of `instances.insert`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InstanceInsert {
    pub name: String,
    pub machine_type: String,
    pub disks: Vec<BootDisk>,
    pub network_interfaces: Vec<NetworkInterface>,
    pub metadata: MetadataResource,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<ServiceAccountRefResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BootDisk {
    pub boot: bool,
    pub auto_delete: bool,
    pub initialize_params: InitializeParams,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeParams {
    pub source_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NetworkInterface {
    pub network: String,
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AccessConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct Tags {
    pub items: Vec<String>,
}

/// Body of `instances.attachDisk`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttachDisk {
    pub source: String,
    pub device_name: String,
    pub mode: &'static str,
    pub auto_delete: bool,
}

/// Body of `disks.insert`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DiskInsert {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_gb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_snapshot: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SnapshotInsert {
    pub name: String,
}

/// Body of the IAM `serviceAccounts.create` call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceAccountCreate {
    pub account_id: String,
    pub service_account: ServiceAccountDisplay,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceAccountDisplay {
    pub display_name: String,
}

/// Error envelope shared by Google APIs.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub message: String,
}

impl From<InstanceResource> for Instance {
    fn from(r: InstanceResource) -> Self {
        Self {
            name: r.name,
            self_link: r.self_link,
            status: InstanceStatus::parse(&r.status),
            creation_timestamp: r.creation_timestamp,
            disks: r
                .disks
                .into_iter()
                .map(|d| AttachedDisk {
                    device_name: d.device_name,
                    source: d.source,
                    boot: d.boot,
                })
                .collect(),
            service_accounts: r
                .service_accounts
                .into_iter()
                .map(|sa| ServiceAccountRef {
                    email: sa.email,
                    scopes: sa.scopes,
                })
                .collect(),
            metadata: r.metadata.into(),
        }
    }
}

impl From<MetadataResource> for Metadata {
    fn from(r: MetadataResource) -> Self {
        Self {
            fingerprint: r.fingerprint,
            items: r
                .items
                .into_iter()
                .map(|i| MetadataItem {
                    key: i.key,
                    value: i.value,
                })
                .collect(),
        }
    }
}

impl From<&Metadata> for MetadataResource {
    fn from(m: &Metadata) -> Self {
        Self {
            fingerprint: m.fingerprint.clone(),
            items: m
                .items
                .iter()
                .map(|i| MetadataItemResource {
                    key: i.key.clone(),
                    value: i.value.clone(),
                })
                .collect(),
        }
    }
}

impl From<DiskResource> for Disk {
    fn from(r: DiskResource) -> Self {
        Self {
            name: r.name,
            self_link: r.self_link,
            status: DiskStatus::parse(&r.status),
            size_gb: r.size_gb.parse().unwrap_or(0),
            users: r.users,
            source_snapshot: r.source_snapshot,
        }
    }
}

impl From<SnapshotResource> for Snapshot {
    fn from(r: SnapshotResource) -> Self {
        Self {
            name: r.name,
            self_link: r.self_link,
            status: r.status,
            source_disk: r.source_disk,
        }
    }
}

impl From<OperationResource> for Operation {
    fn from(r: OperationResource) -> Self {
        Self {
            name: r.name,
            status: OperationStatus::parse(&r.status),
            target_link: r.target_link,
            errors: r
                .error
                .map(|e| {
                    e.errors
                        .into_iter()
                        .map(|e| OperationError {
                            code: e.code,
                            message: e.message,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

impl From<ServiceAccountResource> for ServiceAccount {
    fn from(r: ServiceAccountResource) -> Self {
        Self {
            email: r.email,
            unique_id: r.unique_id,
            display_name: r.display_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_from_api_json() {
        let json = r#"{
            "name": "vm-1",
            "selfLink": "https://compute.googleapis.com/compute/v1/projects/p/zones/z/instances/vm-1",
            "status": "RUNNING",
            "creationTimestamp": "2024-05-01T10:00:00.000-07:00",
            "disks": [
                {"deviceName": "persistent-disk-0", "source": "https://x/disks/vm-1", "boot": true},
                {"deviceName": "user-disk", "source": "https://x/disks/user-abc-disk"}
            ],
            "serviceAccounts": [{"email": "vm-1@p.iam.gserviceaccount.com", "scopes": []}],
            "metadata": {
                "fingerprint": "abc=",
                "items": [{"key": "backend-id", "value": "b-1"}]
            }
        }"#;

        let instance: Instance = serde_json::from_str::<InstanceResource>(json).unwrap().into();

        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(
            instance.creation_timestamp.to_rfc3339(),
            "2024-05-01T17:00:00+00:00"
        );
        assert_eq!(instance.backend_id(), Some("b-1"));
        assert_eq!(instance.metadata.fingerprint.as_deref(), Some("abc="));
        assert_eq!(
            instance.data_disk_names().collect::<Vec<_>>(),
            vec!["user-abc-disk"]
        );
    }

    #[test]
    fn disk_size_is_a_string() {
        let json = r#"{"name": "d", "status": "READY", "sizeGb": "200"}"#;
        let disk: Disk = serde_json::from_str::<DiskResource>(json).unwrap().into();
        assert_eq!(disk.size_gb, 200);
        assert!(disk.users.is_empty());
    }

    #[test]
    fn operation_errors_are_collected() {
        let json = r#"{
            "name": "op-1",
            "status": "DONE",
            "error": {"errors": [
                {"code": "QUOTA_EXCEEDED", "message": "no CPUs"},
                {"code": "ZONE_RESOURCE_POOL_EXHAUSTED", "message": "no capacity"}
            ]}
        }"#;
        let op: Operation = serde_json::from_str::<OperationResource>(json).unwrap().into();
        assert!(op.is_done());
        assert_eq!(op.errors.len(), 2);
        assert!(op.into_result().is_err());
    }

    #[test]
    fn insert_body_uses_api_field_names() {
        let body = InstanceInsert {
            name: "vm-1".to_string(),
            machine_type: "zones/z/machineTypes/e2-small".to_string(),
            disks: vec![BootDisk {
                boot: true,
                auto_delete: true,
                initialize_params: InitializeParams {
                    source_image: "projects/cos-cloud/global/images/family/cos-stable".to_string(),
                    disk_size_gb: None,
                },
            }],
            network_interfaces: Vec::new(),
            metadata: MetadataResource::default(),
            service_accounts: Vec::new(),
            tags: None,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["machineType"], "zones/z/machineTypes/e2-small");
        assert_eq!(json["disks"][0]["autoDelete"], true);
        assert!(json["disks"][0]["initializeParams"].get("diskSizeGb").is_none());
        assert!(json.get("serviceAccounts").is_none());
        assert!(json.get("tags").is_none());
    }
}
