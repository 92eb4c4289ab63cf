use crate::types::OperationError;

/// Errors that can occur while managing the pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("metadata fingerprint mismatch on instance '{0}'")]
    FingerprintMismatch(String),

    #[error("operation '{name}' failed: {}", join_errors(.errors))]
    OperationFailed {
        name: String,
        errors: Vec<OperationError>,
    },

    #[error("unexpected {kind} status for '{name}': {status}")]
    UnexpectedStatus {
        kind: &'static str,
        name: String,
        status: String,
    },

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("no free VM could be claimed after {0} attempts")]
    PoolExhausted(u32),

    #[error("pool is shutting down")]
    PoolShutdown,

    #[error("invalid instance '{name}': {reason}")]
    InvalidInstance { name: String, reason: String },

    #[error("cloud API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Http(String),

    #[error("proxy admin error: {0}")]
    Proxy(String),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn join_errors(errors: &[OperationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_found() {
        let err = Error::not_found("disk", "user-abc-disk");
        assert_eq!(err.to_string(), "disk 'user-abc-disk' not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn error_display_fingerprint_mismatch() {
        let err = Error::FingerprintMismatch("vm-1".to_string());
        assert_eq!(
            err.to_string(),
            "metadata fingerprint mismatch on instance 'vm-1'"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn error_display_operation_failed_joins_all_errors() {
        let err = Error::OperationFailed {
            name: "op-42".to_string(),
            errors: vec![
                OperationError {
                    code: "QUOTA_EXCEEDED".to_string(),
                    message: "CPUS quota exceeded".to_string(),
                },
                OperationError {
                    code: "RESOURCE_NOT_READY".to_string(),
                    message: "disk busy".to_string(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "operation 'op-42' failed: QUOTA_EXCEEDED: CPUS quota exceeded; RESOURCE_NOT_READY: disk busy"
        );
    }

    #[test]
    fn error_display_unexpected_status() {
        let err = Error::UnexpectedStatus {
            kind: "disk",
            name: "user-x-disk".to_string(),
            status: "FAILED".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected disk status for 'user-x-disk': FAILED"
        );
    }

    #[test]
    fn error_display_pool_exhausted() {
        let err = Error::PoolExhausted(5);
        assert_eq!(
            err.to_string(),
            "no free VM could be claimed after 5 attempts"
        );
    }

    #[test]
    fn error_display_api() {
        let err = Error::Api {
            status: 403,
            message: "permission denied".to_string(),
        };
        assert_eq!(err.to_string(), "cloud API returned 403: permission denied");
    }

    #[test]
    fn error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
