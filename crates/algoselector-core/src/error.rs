//! Error types for the pipeline core.
//!
//! Every failure a stage can observe is a [`PipelineError`]. Each variant
//! belongs to exactly one [`ErrorKind`], and the kind decides how the failure
//! is rendered: a redirect, a "not available" state, an inline validation
//! message, a retryable error, or an informational empty state.
//!
//! Errors are `Clone` because one in-flight fetch may settle many waiters,
//! and they serialize as `{code, message}` for presentation layers.

use std::time::Duration;

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

use crate::guard::Prerequisite;

/// The five error categories a stage can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No credential, or the service rejected it. Rendered as a redirect to login.
    Unauthenticated,
    /// An artifact that has not been produced yet.
    NotFound,
    /// Bad input. Blocks only the action that triggered it.
    ValidationFailure,
    /// Network or server fault. The triggering action stays enabled.
    RemoteFailure,
    /// The call succeeded but produced nothing usable.
    EmptyResult,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::NotFound => "not_found",
            Self::ValidationFailure => "validation_failure",
            Self::RemoteFailure => "remote_failure",
            Self::EmptyResult => "empty_result",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for the pipeline core.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum PipelineError {
    /// No credential is present, or the service refused the one we sent.
    #[error("Not signed in")]
    Unauthenticated,

    /// The requested artifact does not exist (yet).
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Input rejected before or by the service.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A stage was entered without the session values it depends on.
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(Prerequisite),

    /// The service answered with a non-success status.
    #[error("Remote service error {status}: {message}")]
    Remote { status: u16, message: String },

    /// A call exceeded its deadline.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout { operation: String, after: Duration },

    /// The request never reached the service, or the connection broke.
    #[error("Network error: {0}")]
    Network(String),

    /// The call succeeded but returned nothing usable.
    #[error("{0}")]
    EmptyResult(String),

    /// The response body did not have the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Local file system failure (reading an upload, saving a report).
    #[error("IO error: {0}")]
    Io(String),

    /// The local file could not be read as a table.
    #[error("Not a readable table: {0}")]
    Tabular(String),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A run is already in flight for this dataset.
    #[error("A run is already in progress for dataset {dataset_id}")]
    RunInFlight { dataset_id: String },
}

impl PipelineError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// The presentation category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_)
            | Self::MissingPrerequisite(_)
            | Self::Tabular(_)
            | Self::InvalidConfig(_)
            | Self::RunInFlight { .. } => ErrorKind::ValidationFailure,
            Self::Remote { .. }
            | Self::Timeout { .. }
            | Self::Network(_)
            | Self::Decode(_)
            | Self::Io(_) => ErrorKind::RemoteFailure,
            Self::EmptyResult(_) => ErrorKind::EmptyResult,
        }
    }

    /// Get error code for frontend handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::MissingPrerequisite(_) => "MISSING_PREREQUISITE",
            Self::Remote { .. } => "REMOTE_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Network(_) => "NETWORK_ERROR",
            Self::EmptyResult(_) => "EMPTY_RESULT",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Tabular(_) => "INVALID_TABLE",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::RunInFlight { .. } => "RUN_IN_FLIGHT",
        }
    }

    /// Only remote failures can succeed on a plain retry.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::RemoteFailure
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<polars::error::PolarsError> for PipelineError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::Tabular(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Remote {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
