use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

impl OperationStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "DONE" => Self::Done,
            "RUNNING" => Self::Running,
            _ => Self::Pending,
        }
    }
}

/// One entry of the error list a finished operation may carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: String,
    pub message: String,
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A long-running zonal operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub status: OperationStatus,
    #[serde(default)]
    pub target_link: Option<String>,
    #[serde(default)]
    pub errors: Vec<OperationError>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// Converts a finished operation into its outcome.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::OperationFailed {
                name: self.name,
                errors: self.errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_without_errors_is_ok() {
        let op = Operation {
            name: "op".to_string(),
            status: OperationStatus::Done,
            target_link: None,
            errors: vec![],
        };
        assert!(op.is_done());
        assert!(op.into_result().is_ok());
    }

    #[test]
    fn errors_become_operation_failed() {
        let op = Operation {
            name: "op".to_string(),
            status: OperationStatus::Done,
            target_link: None,
            errors: vec![OperationError {
                code: "ZONE_RESOURCE_POOL_EXHAUSTED".to_string(),
                message: "no capacity".to_string(),
            }],
        };
        match op.into_result() {
            Err(Error::OperationFailed { name, errors }) => {
                assert_eq!(name, "op");
                assert_eq!(errors.len(), 1);
            }
            other => panic!("expected OperationFailed, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_status_is_pending() {
        assert_eq!(OperationStatus::parse("DONE"), OperationStatus::Done);
        assert_eq!(OperationStatus::parse("whatever"), OperationStatus::Pending);
    }
}
