use crate::types::resource_name;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiskStatus {
    Creating,
    Restoring,
    Ready,
    Failed,
    Deleting,
    #[serde(other)]
    Unknown,
}

impl DiskStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "CREATING" => Self::Creating,
            "RESTORING" => Self::Restoring,
            "READY" => Self::Ready,
            "FAILED" => Self::Failed,
            "DELETING" => Self::Deleting,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Restoring => "RESTORING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
            Self::Deleting => "DELETING",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Still being materialised; worth polling again.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Creating | Self::Restoring)
    }
}

impl fmt::Display for DiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persistent disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub self_link: String,
    pub status: DiskStatus,
    pub size_gb: u64,
    /// Self-links of the instances this disk is attached to.
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub source_snapshot: Option<String>,
}

impl Disk {
    pub fn is_ready(&self) -> bool {
        self.status == DiskStatus::Ready
    }

    /// Name of the instance currently holding this disk, if any.
    pub fn attached_instance(&self) -> Option<&str> {
        self.users.first().map(|link| resource_name(link))
    }
}

/// Provider-neutral request to insert a disk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiskSpec {
    pub name: String,
    pub size_gb: Option<u64>,
    /// Snapshot to restore from; `None` creates a blank disk.
    pub source_snapshot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub self_link: String,
    pub status: String,
    #[serde(default)]
    pub source_disk: Option<String>,
}
