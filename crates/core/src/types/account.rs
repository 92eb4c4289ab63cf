use serde::{Deserialize, Serialize};

/// An IAM service account owned by a pooled VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub email: String,
    #[serde(default)]
    pub unique_id: String,
    #[serde(default)]
    pub display_name: String,
}
