use crate::types::resource_name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata key holding the id the reverse proxy knows this VM by.
pub const BACKEND_ID_KEY: &str = "backend-id";
/// Metadata key holding the owning user; empty means unassigned.
pub const FOR_USER_KEY: &str = "for-user";
/// Metadata key holding the RFC3339 time the VM was assigned.
pub const FOR_USER_TIMESTAMP_KEY: &str = "for-user-timestamp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

/// Instance metadata together with the fingerprint it was read at.
///
/// Writes are guarded by the fingerprint: a write carrying a stale
/// fingerprint is rejected by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.value.as_str())
    }

    /// Replaces every existing value for `key` with a single new entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.items.retain(|item| item.key != key);
        self.items.push(MetadataItem {
            key,
            value: value.into(),
        });
    }

    pub fn remove(&mut self, key: &str) {
        self.items.retain(|item| item.key != key);
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Repairing,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "PROVISIONING" => Self::Provisioning,
            "STAGING" => Self::Staging,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "STOPPED" => Self::Stopped,
            "SUSPENDING" => Self::Suspending,
            "SUSPENDED" => Self::Suspended,
            "REPAIRING" => Self::Repairing,
            "TERMINATED" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Staging => "STAGING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Suspending => "SUSPENDING",
            Self::Suspended => "SUSPENDED",
            Self::Repairing => "REPAIRING",
            Self::Terminated => "TERMINATED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// True for the states a freshly inserted VM is expected to be in.
    pub fn is_booting_or_running(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Staging | Self::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A disk attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedDisk {
    pub device_name: String,
    /// Self-link of the disk resource.
    pub source: String,
    #[serde(default)]
    pub boot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountRef {
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Pool state of a VM, derived entirely from its metadata and disks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// No owner; only the boot disk is attached.
    Free,
    /// Owner recorded but the user disk is not attached (yet).
    PartiallyAssigned,
    /// Owner recorded and the user disk is attached.
    FullyAssigned,
}

/// A compute instance as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub self_link: String,
    pub status: InstanceStatus,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub disks: Vec<AttachedDisk>,
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccountRef>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Instance {
    pub fn backend_id(&self) -> Option<&str> {
        self.metadata.get(BACKEND_ID_KEY).filter(|id| !id.is_empty())
    }

    /// The owning user, or an empty string for an unassigned VM.
    pub fn for_user(&self) -> &str {
        self.metadata.get(FOR_USER_KEY).unwrap_or("")
    }

    pub fn assigned_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.metadata.get(FOR_USER_TIMESTAMP_KEY)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Whether this VM was created by the pool.
    pub fn is_managed(&self) -> bool {
        self.backend_id().is_some()
    }

    pub fn is_unassigned(&self) -> bool {
        self.for_user().is_empty()
    }

    pub fn state(&self) -> VmState {
        if self.is_unassigned() {
            VmState::Free
        } else if self.disks.len() < 2 {
            VmState::PartiallyAssigned
        } else {
            VmState::FullyAssigned
        }
    }

    pub fn first_service_account(&self) -> Option<&str> {
        self.service_accounts.first().map(|sa| sa.email.as_str())
    }

    /// Names of the non-boot disks attached to this instance.
    pub fn data_disk_names(&self) -> impl Iterator<Item = &str> {
        self.disks
            .iter()
            .filter(|d| !d.boot)
            .map(|d| resource_name(&d.source))
    }
}

/// Provider-neutral request to insert an instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub machine_type: String,
    pub boot_image: String,
    pub boot_disk_size_gb: Option<u64>,
    pub network: String,
    pub metadata: Metadata,
    pub service_account: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}
