//! Request lifecycles and the stale-response guard.
//!
//! Every stage read is issued through a [`StaleGuard`], which hands out a
//! [`RequestTicket`] recording the epoch and the session parameters active
//! at issue time. Issuing a newer request, or leaving the stage, advances the
//! epoch. A response whose ticket is no longer current, or whose parameters
//! no longer match the session, is dropped instead of applied.
//!
//! # Example
//!
//! ```
//! use algoselector_core::{RequestParams, RequestState, StaleGuard};
//!
//! let guard = StaleGuard::new();
//! let params = RequestParams::new(Some("abc123"), None);
//!
//! let mut first = guard.issue(params.clone());
//! let mut second = guard.issue(params.clone());
//!
//! // The newer request supersedes the older one.
//! assert_eq!(first.settle(&params, true), RequestState::Cancelled);
//! assert_eq!(second.settle(&params, true), RequestState::Settled);
//! ```
//!
//! # Thread Safety
//!
//! `StaleGuard` is `Send + Sync`; clones share the same epoch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::session::Session;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    #[default]
    Issued,
    Settled,
    Failed,
    /// Superseded or abandoned. Its outcome must not be applied.
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Issued)
    }
}

/// Session parameters a stage read depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RequestParams {
    pub dataset_id: Option<String>,
    pub target_column: Option<String>,
}

impl RequestParams {
    pub fn new(dataset_id: Option<&str>, target_column: Option<&str>) -> Self {
        Self {
            dataset_id: dataset_id.map(str::to_string),
            target_column: target_column.map(str::to_string),
        }
    }

    pub fn from_session(session: &Session) -> Self {
        Self {
            dataset_id: session.dataset_id.clone(),
            target_column: session.target_column.clone(),
        }
    }

    /// Parameters for stages that only depend on the dataset.
    pub fn dataset_only(&self) -> Self {
        Self {
            dataset_id: self.dataset_id.clone(),
            target_column: None,
        }
    }
}

/// Issues tickets and invalidates them on supersession or cancellation.
#[derive(Debug, Clone)]
pub struct StaleGuard {
    epoch: Arc<AtomicU64>,
}

impl Default for StaleGuard {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(StaleGuard: Send, Sync);
static_assertions::assert_impl_all!(RequestTicket: Send, Sync);

impl StaleGuard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a request. Any ticket issued earlier becomes stale.
    pub fn issue(&self, params: RequestParams) -> RequestTicket {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        RequestTicket {
            epoch,
            current: self.epoch.clone(),
            params,
            state: RequestState::Issued,
        }
    }

    /// Invalidate every outstanding ticket, e.g. when the user leaves the stage.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// Handle for one issued request.
#[derive(Debug)]
pub struct RequestTicket {
    epoch: u64,
    current: Arc<AtomicU64>,
    params: RequestParams,
    state: RequestState,
}

impl RequestTicket {
    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// No newer request was issued and the stage was not left.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.epoch
    }

    /// The response may be applied under the `active` parameters.
    #[must_use]
    pub fn accepts(&self, active: &RequestParams) -> bool {
        self.is_current() && &self.params == active
    }

    /// Record the outcome and return the final state.
    ///
    /// Yields [`RequestState::Cancelled`] when the ticket no longer
    /// [`accepts`](Self::accepts) the active parameters.
    pub fn settle(&mut self, active: &RequestParams, succeeded: bool) -> RequestState {
        self.state = if !self.accepts(active) {
            RequestState::Cancelled
        } else if succeeded {
            RequestState::Settled
        } else {
            RequestState::Failed
        };
        self.state
    }
}
