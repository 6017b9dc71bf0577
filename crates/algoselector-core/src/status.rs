//! Stage status exposed to the presentation layer.
//!
//! A [`StageStatus`] is everything a renderer needs: it never has to inspect
//! a raw error. Expected absences and empty outcomes get their own variants
//! so they can be shown as guidance instead of an error banner.

use serde::Serialize;

use crate::error::{ErrorKind, PipelineError};
use crate::guard::Prerequisite;

/// Status of a stage's primary read or action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageStatus<T> {
    /// Nothing requested yet.
    Idle,
    Loading,
    Ready(T),
    /// The upstream artifact has not been produced yet.
    NotAvailable(String),
    /// The stage was entered without a session value it needs.
    MissingPrerequisite(Prerequisite),
    /// The call succeeded but produced no usable output. Not retried.
    Empty(String),
    Error {
        kind: ErrorKind,
        message: String,
        retryable: bool,
    },
}

impl<T> Default for StageStatus<T> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<T> StageStatus<T> {
    /// Render an error as the status its kind calls for.
    pub fn from_error(err: &PipelineError) -> Self {
        match err {
            PipelineError::MissingPrerequisite(prerequisite) => {
                Self::MissingPrerequisite(*prerequisite)
            }
            other => match other.kind() {
                ErrorKind::NotFound => Self::NotAvailable(other.to_string()),
                ErrorKind::EmptyResult => Self::Empty(other.to_string()),
                kind => Self::Error {
                    kind,
                    message: other.to_string(),
                    retryable: other.is_retryable(),
                },
            },
        }
    }

    pub fn from_result(result: Result<T, PipelineError>) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(err) => Self::from_error(&err),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready(_) => "ready",
            Self::NotAvailable(_) => "not_available",
            Self::MissingPrerequisite(_) => "missing_prerequisite",
            Self::Empty(_) => "empty",
            Self::Error { .. } => "error",
        }
    }

    /// Settled one way or another.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle | Self::Loading)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The presentation layer should redirect to login.
    pub fn needs_login(&self) -> bool {
        matches!(
            self,
            Self::Error {
                kind: ErrorKind::Unauthenticated,
                ..
            } | Self::MissingPrerequisite(Prerequisite::Credential)
        )
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageStatus<U> {
        match self {
            Self::Idle => StageStatus::Idle,
            Self::Loading => StageStatus::Loading,
            Self::Ready(value) => StageStatus::Ready(f(value)),
            Self::NotAvailable(message) => StageStatus::NotAvailable(message),
            Self::MissingPrerequisite(p) => StageStatus::MissingPrerequisite(p),
            Self::Empty(message) => StageStatus::Empty(message),
            Self::Error {
                kind,
                message,
                retryable,
            } => StageStatus::Error {
                kind,
                message,
                retryable,
            },
        }
    }

    /// Human-readable one-liner for non-ready states.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Idle | Self::Ready(_) => None,
            Self::Loading => Some("Loading...".to_string()),
            Self::NotAvailable(message) | Self::Empty(message) => Some(message.clone()),
            Self::MissingPrerequisite(p) => Some(format!("Cannot continue: {}", p)),
            Self::Error { message, .. } => Some(message.clone()),
        }
    }
}
