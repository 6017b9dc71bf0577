//! Stage controllers, one per pipeline stage.
//!
//! Every controller follows the same contract ([`StageController`]):
//! `enter` checks prerequisites through the [`AccessGuard`] and issues the
//! minimal cache reads the stage needs, `refresh` bypasses the cache for the
//! stage's primary read, `leave` cancels outstanding reads, and `status`
//! reports what to render.
//!
//! Controllers never keep private copies of remote results. Values shown in a
//! [`StageStatus`] are always read through the [`ResultCache`].

mod explainability;
mod insights;
mod monitoring;
mod preprocessing;
mod selection;
mod upload;

pub use explainability::ExplainabilityController;
pub use insights::InsightsController;
pub use monitoring::{BoundedHistory, MonitoringController, MonitoringSnapshot, StatsSample};
pub use preprocessing::{ActionOutcome, ActionState, PreprocessingController};
pub use selection::SelectionController;
pub use upload::UploadController;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::cache::ResultCache;
use crate::config::ClientConfig;
use crate::error::PipelineError;
use crate::gateway::RemoteGateway;
use crate::guard::{AccessGuard, Prerequisite, Stage, StageContext};
use crate::request::{RequestParams, RequestState, RequestTicket, StaleGuard};
use crate::session::SessionStore;
use crate::status::StageStatus;

/// Handles shared by every controller.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub session: Arc<SessionStore>,
    pub gateway: RemoteGateway,
    pub cache: Arc<ResultCache>,
    pub guard: AccessGuard,
    pub config: ClientConfig,
}

impl PipelineContext {
    /// Session parameters right now, for comparing against a ticket.
    pub fn active_params(&self) -> RequestParams {
        RequestParams::from_session(&self.session.snapshot())
    }

    pub(crate) fn require(&self, stage: Stage) -> Result<StageContext, PipelineError> {
        self.guard
            .require(stage)
            .map_err(PipelineError::MissingPrerequisite)
    }

    /// Dataset id and optional target for a stage that needs a dataset.
    pub(crate) fn require_dataset(
        &self,
        stage: Stage,
    ) -> Result<(String, Option<String>), PipelineError> {
        let resolved = self.require(stage)?;
        let dataset_id = resolved
            .dataset_id
            .ok_or(PipelineError::MissingPrerequisite(Prerequisite::DatasetId))?;
        Ok((dataset_id, resolved.target_column))
    }
}

/// Common contract of all stage controllers.
#[async_trait]
pub trait StageController: Send + Sync {
    /// What a ready stage renders.
    type Output: Clone + Send + Sync + 'static;

    fn stage(&self) -> Stage;

    fn status(&self) -> StageStatus<Self::Output>;

    /// Validate prerequisites and load what the stage renders.
    async fn enter(&self) -> StageStatus<Self::Output>;

    /// Reload the primary read, bypassing the cache.
    async fn refresh(&self) -> StageStatus<Self::Output>;

    /// Stop applying responses to this stage.
    fn leave(&self);

    /// Forget everything shown, e.g. on logout.
    fn reset(&self);
}

/// Status slot plus stale-response guard for one stage read.
#[derive(Debug)]
pub(crate) struct StageCell<T> {
    stage: Stage,
    status: RwLock<StageStatus<T>>,
    guard: StaleGuard,
}

impl<T: Clone> StageCell<T> {
    pub(crate) fn new(stage: Stage) -> Self {
        Self {
            stage,
            status: RwLock::new(StageStatus::Idle),
            guard: StaleGuard::new(),
        }
    }

    pub(crate) fn get(&self) -> StageStatus<T> {
        self.status.read().clone()
    }

    pub(crate) fn set(&self, status: StageStatus<T>) {
        *self.status.write() = status;
    }

    /// Issue a request: supersede older ones and show `Loading`.
    pub(crate) fn begin(&self, params: RequestParams) -> RequestTicket {
        let ticket = self.guard.issue(params);
        self.set(StageStatus::Loading);
        ticket
    }

    /// Apply a response if its ticket still matches the active parameters.
    pub(crate) fn settle(
        &self,
        mut ticket: RequestTicket,
        active: &RequestParams,
        status: StageStatus<T>,
    ) -> StageStatus<T> {
        let state = ticket.settle(active, !status.is_error());
        if state == RequestState::Cancelled {
            debug!(
                stage = self.stage.as_str(),
                ?ticket,
                "Dropping stale response"
            );
            return self.get();
        }
        self.set(status.clone());
        status
    }

    /// Invalidate outstanding tickets. A pending `Loading` falls back to `Idle`.
    pub(crate) fn cancel(&self) {
        self.guard.cancel();
        let mut status = self.status.write();
        if status.is_loading() {
            *status = StageStatus::Idle;
        }
    }

    pub(crate) fn reset(&self) {
        self.guard.cancel();
        self.set(StageStatus::Idle);
    }

    /// Record a failed prerequisite check.
    pub(crate) fn block(&self, err: &PipelineError) -> StageStatus<T> {
        self.guard.cancel();
        let status = StageStatus::from_error(err);
        self.set(status.clone());
        status
    }
}

/// Replace the message of a not-available status with stage guidance.
pub(crate) fn with_guidance<T>(status: StageStatus<T>, guidance: &str) -> StageStatus<T> {
    match status {
        StageStatus::NotAvailable(_) => StageStatus::NotAvailable(guidance.to_string()),
        other => other,
    }
}
