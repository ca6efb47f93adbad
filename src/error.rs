//! Typed failures the scenario runner knows how to classify
//!
//! Everything else travels as `anyhow::Error` with context attached.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Timed out after {secs}s waiting for {what}{}", last_seen(.last))]
    Timeout {
        what: String,
        secs: u64,
        last: Option<String>,
    },

    #[error("{what} reached stop status: {reason}")]
    StopStatus { what: String, reason: String },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Missing prerequisite: {0}")]
    Missing(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

fn last_seen(last: &Option<String>) -> String {
    match last {
        Some(value) => format!(" (last seen: {value})"),
        None => String::new(),
    }
}

impl StorageError {
    pub fn assertion(message: impl Into<String>) -> Self {
        StorageError::Assertion(message.into())
    }

    pub fn missing(message: impl Into<String>) -> Self {
        StorageError::Missing(message.into())
    }

    /// Failures that mean the cluster behaved wrongly, as opposed to the
    /// suite being unable to talk to it.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StorageError::Timeout { .. }
                | StorageError::StopStatus { .. }
                | StorageError::Assertion(_)
                | StorageError::Forbidden(_)
                | StorageError::Upload(_)
        )
    }
}

/// Return an assertion error from the enclosing function when `cond` is false.
#[macro_export]
macro_rules! ensure_that {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::StorageError::Assertion(format!($($arg)+)).into());
        }
    };
}

/// True when the API rejected a request with the given HTTP status code.
pub fn is_api_status(err: &anyhow::Error, code: u16) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<kube::Error>(),
            Some(kube::Error::Api(resp)) if resp.code == code
        ) || matches!(
            cause.downcast_ref::<StorageError>(),
            Some(StorageError::Kube(kube::Error::Api(resp))) if resp.code == code
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "denied".to_string(),
            reason: "Forbidden".to_string(),
            code,
        })
    }

    #[test]
    fn test_timeout_message() {
        let err = StorageError::Timeout {
            what: "DataVolume dv-1 phase Succeeded".to_string(),
            secs: 60,
            last: Some("ImportInProgress".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 60s waiting for DataVolume dv-1 phase Succeeded (last seen: ImportInProgress)"
        );
    }

    #[test]
    fn test_failure_classification() {
        assert!(StorageError::assertion("x").is_failure());
        assert!(!StorageError::missing("no hpp").is_failure());
        assert!(!StorageError::Kube(api_error(500)).is_failure());
    }

    #[test]
    fn test_is_api_status_through_context() {
        let err: anyhow::Error = Err::<(), _>(api_error(422))
            .context("Failed to create DataVolume")
            .unwrap_err();
        assert!(is_api_status(&err, 422));
        assert!(!is_api_status(&err, 403));
    }

    #[test]
    fn test_ensure_that_macro() {
        fn check(value: u32) -> anyhow::Result<()> {
            ensure_that!(value == 3, "expected 3 files, found {value}");
            Ok(())
        }
        assert!(check(3).is_ok());
        let err = check(2).unwrap_err();
        assert!(err.to_string().contains("expected 3 files, found 2"));
    }
}
