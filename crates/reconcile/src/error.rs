//! Error types for the reconciliation engine.
//!
//! Errors are grouped by the phase that raises them so callers can tell a
//! broken declaration (nothing ran) from a failed provider call (one branch
//! failed) from an unusable state record (nothing may be written).

use crate::types::{OperationKind, ResourceKind};
use thiserror::Error;

/// Phase an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Graph construction failed; the run never starts
    Construction,
    /// A provider call failed; scoped to one resource and its dependents
    Execution,
    /// The state store could not be read, written or locked
    State,
    /// Anything else
    Other,
}

/// Errors raised by the engine
#[derive(Debug, Error)]
pub enum Error {
    /// Dependency edges form a cycle
    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected {
        /// Resources on the cycle, first name repeated at the end
        cycle: Vec<String>,
    },

    /// Two declarations share a name
    #[error("duplicate resource name: {name}")]
    DuplicateName { name: String },

    /// A dependency names a resource that is not declared
    #[error("resource '{resource}' depends on unknown resource '{reference}'")]
    UnresolvedReference { resource: String, reference: String },

    /// An argument reference points at a resource of the wrong kind
    #[error("resource '{resource}' references {actual} '{reference}', expected a {expected}")]
    InvalidReference {
        resource: String,
        reference: String,
        expected: ResourceKind,
        actual: ResourceKind,
    },

    /// Argument validation failed
    #[error("invalid property '{property}' on '{resource}': {message}")]
    InvalidProperty {
        resource: String,
        property: String,
        message: String,
    },

    /// Retryable provider failure that outlived the retry budget
    #[error("{operation} '{resource}' failed after {attempts} attempt(s): {message}")]
    ProviderTransient {
        resource: String,
        operation: OperationKind,
        attempts: u32,
        message: String,
    },

    /// Provider failure that is not worth retrying
    #[error("{operation} '{resource}' failed: {message}")]
    ProviderFatal {
        resource: String,
        operation: OperationKind,
        message: String,
    },

    /// A property cannot be changed in place
    #[error("{operation} '{resource}': property '{property}' requires replacement")]
    PropertyImmutableConflict {
        resource: String,
        operation: OperationKind,
        property: String,
    },

    /// The persisted record failed its integrity checks
    #[error("state for stack '{stack}' is corrupt: {message}")]
    StateCorrupt { stack: String, message: String },

    /// Another run holds the stack lock
    #[error("stack '{stack}' is locked by another run")]
    StateLocked { stack: String },

    /// The record moved between showing a plan and taking the lock
    #[error("state for stack '{stack}' changed since the plan was computed")]
    StateChanged { stack: String },

    /// Stack names end up in file names
    #[error("invalid stack name '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidStackName(String),

    /// A stack output points at a resource or key that does not exist
    #[error("unknown output reference '{reference}'")]
    UnknownOutput { reference: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::CycleDetected { .. }
            | Error::DuplicateName { .. }
            | Error::UnresolvedReference { .. }
            | Error::InvalidReference { .. }
            | Error::InvalidProperty { .. }
            | Error::UnknownOutput { .. } => ErrorCategory::Construction,
            Error::ProviderTransient { .. }
            | Error::ProviderFatal { .. }
            | Error::PropertyImmutableConflict { .. } => ErrorCategory::Execution,
            Error::StateCorrupt { .. }
            | Error::StateLocked { .. }
            | Error::StateChanged { .. }
            | Error::InvalidStackName(_)
            | Error::Io(_)
            | Error::Json(_) => ErrorCategory::State,
            Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Resource the error is about, if any
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::UnresolvedReference { resource, .. }
            | Error::InvalidReference { resource, .. }
            | Error::InvalidProperty { resource, .. }
            | Error::ProviderTransient { resource, .. }
            | Error::ProviderFatal { resource, .. }
            | Error::PropertyImmutableConflict { resource, .. } => Some(resource),
            Error::DuplicateName { name } => Some(name),
            _ => None,
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error a provider returns from a single call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Timeouts, unreachable daemon, rate limits
    #[error("{0}")]
    Transient(String),

    /// Invalid arguments, missing objects, conflicts
    #[error("{0}")]
    Fatal(String),

    /// The change needs a delete and re-create
    #[error("property '{property}' cannot be updated in place")]
    ImmutableConflict { property: String },
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Attach the resource and operation the call was made for
    pub fn into_error(self, resource: &str, operation: OperationKind, attempts: u32) -> Error {
        match self {
            Self::Transient(message) => Error::ProviderTransient {
                resource: resource.to_string(),
                operation,
                attempts,
                message,
            },
            Self::Fatal(message) => Error::ProviderFatal {
                resource: resource.to_string(),
                operation,
                message,
            },
            Self::ImmutableConflict { property } => Error::PropertyImmutableConflict {
                resource: resource.to_string(),
                operation,
                property,
            },
        }
    }
}
