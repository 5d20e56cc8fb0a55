//! Cloud connector error types
//!
//! `CloudError` is deliberately `Clone`: a settled promise hands the same
//! rejection to every registered callback, so causes are carried as rendered
//! strings rather than source errors.

use thiserror::Error;

/// Cloud connector errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// A remote management call failed at the transport layer.
    #[error("failed to {operation}: {message}")]
    Transport { operation: String, message: String },

    /// 404-equivalent. Benign in status-polling paths, hard in listing and
    /// deletion paths.
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    /// A blocking wait gave up before the awaited promise settled. In-flight
    /// remote calls keep running.
    #[error("interrupted: {0}")]
    Interrupted(String),
}

/// Malformed input detected before or between remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid image URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("invalid host name in {0}")]
    InvalidHostName(String),

    #[error("file path must include container name: {0}")]
    MissingContainerName(String),

    #[error("invalid storage account identifier {0}")]
    InvalidAccountId(String),

    #[error("invalid storage account {account} credentials: {message}")]
    InvalidCredentials { account: String, message: String },

    #[error("failed to encode custom data for instance {name}: {message}")]
    Encoding { name: String, message: String },
}

/// A remote resource exists but is in a state the operation cannot use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("VHD image {0} should be generalized")]
    NotGeneralized(String),

    #[error("VHD image should be located in a storage account in the {0} region")]
    RegionMismatch(String),
}

impl CloudError {
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        CloudError::NotFound {
            resource: resource.into(),
        }
    }

    /// Renames the failing operation on a transport error so the message
    /// carries the caller's operation and target. Every other variant passes
    /// through untouched, `NotFound` in particular so status polling can
    /// still recognize a missing instance.
    pub fn context(self, operation: impl Into<String>) -> Self {
        match self {
            CloudError::Transport { message, .. } => CloudError::Transport {
                operation: operation.into(),
                message,
            },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    /// Stable kind tag used by [`crate::types::TypedError`] records.
    pub fn kind(&self) -> &'static str {
        match self {
            CloudError::Transport { .. } => "transport",
            CloudError::NotFound { .. } => "not_found",
            CloudError::Validation(_) => "validation",
            CloudError::State(_) => "state",
            CloudError::Interrupted(_) => "interrupted",
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
