//! Preprocessing stage: target selection and suggested actions.
//!
//! # Action Lifecycle
//!
//! ```text
//!  Idle ──apply──► Applying ──ok──► Applied   (no-op until the dataset changes)
//!                     │
//!                     └──err──► Failed ──apply──► Applying
//! ```
//!
//! Applying an action is sequential: send it, invalidate the dataset's
//! profiles, re-fetch the profile, then mark the action applied. Actions on
//! the same dataset are serialized; actions on different datasets are not.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use super::{PipelineContext, StageCell, StageController, with_guidance};
use crate::cache::{CacheKey, Operation};
use crate::error::{PipelineError, Result};
use crate::gateway::PreprocessRequest;
use crate::guard::{Prerequisite, Stage};
use crate::request::{RequestParams, RequestTicket};
use crate::session::{SessionKey, validate_target_column};
use crate::status::StageStatus;
use crate::types::{Dataset, PreprocessOutcome, PreprocessingAction, ProfilingReport};

/// Column dtypes the service reports for categorical data.
const CATEGORICAL_DTYPES: &[&str] = &["object", "category", "string", "str", "bool"];

const DATASET_GONE: &str = "This dataset is no longer available. Upload it again.";

/// Where one preprocessing action stands for the session dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ActionState {
    #[default]
    Idle,
    Applying,
    Applied,
    Failed(String),
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed(_) => "failed",
        }
    }
}

/// Result of a successful [`PreprocessingController::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Applied(PreprocessOutcome),
    /// Already applied to this dataset; nothing was sent.
    AlreadyApplied,
}

type MutationLocks = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Drop locks nobody holds, except the one for `keep`.
fn prune_locks(locks: &mut MutationLocks, keep: Option<&str>) {
    locks.retain(|id, lock| Some(id.as_str()) == keep || Arc::strong_count(lock) > 1);
}

/// Action states for one dataset. Switching datasets starts a fresh board.
#[derive(Debug, Default)]
struct ActionBoard {
    dataset_id: Option<String>,
    states: HashMap<PreprocessingAction, ActionState>,
}

impl ActionBoard {
    fn get(&self, dataset_id: &str, action: PreprocessingAction) -> ActionState {
        if self.dataset_id.as_deref() != Some(dataset_id) {
            return ActionState::Idle;
        }
        self.states.get(&action).cloned().unwrap_or_default()
    }

    fn set(&mut self, dataset_id: &str, action: PreprocessingAction, state: ActionState) {
        if self.dataset_id.as_deref() != Some(dataset_id) {
            self.dataset_id = Some(dataset_id.to_string());
            self.states.clear();
        }
        self.states.insert(action, state);
    }
}

pub struct PreprocessingController {
    ctx: PipelineContext,
    cell: StageCell<ProfilingReport>,
    board: Mutex<ActionBoard>,
    /// One lock per dataset id, held for the whole apply sequence.
    mutations: Mutex<MutationLocks>,
}

impl PreprocessingController {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            cell: StageCell::new(Stage::Preprocessing),
            board: Mutex::new(ActionBoard::default()),
            mutations: Mutex::new(HashMap::new()),
        }
    }

    /// State of `action` for the session dataset.
    pub fn action_state(&self, action: PreprocessingAction) -> ActionState {
        match self.ctx.session.dataset_id() {
            Some(dataset_id) => self.board.lock().get(&dataset_id, action),
            None => ActionState::Idle,
        }
    }

    pub fn action_states(&self) -> Vec<(PreprocessingAction, ActionState)> {
        PreprocessingAction::ALL
            .iter()
            .map(|action| (*action, self.action_state(*action)))
            .collect()
    }

    /// Column names a target may be chosen from, when known.
    pub fn target_options(&self) -> Vec<String> {
        if let Some(dataset) = self.cached_dataset() {
            return dataset.columns.into_iter().map(|c| c.name).collect();
        }
        self.cell
            .get()
            .into_value()
            .map(|report| report.column_info.into_iter().map(|c| c.name).collect())
            .unwrap_or_default()
    }

    /// Choose the target column and load the profile keyed on it.
    ///
    /// The selection itself is a session write. The profile for the new
    /// (dataset, target) pair is fetched fresh.
    pub async fn select_target(&self, column: &str) -> StageStatus<ProfilingReport> {
        if let Err(err) = self.check_target(column) {
            warn!(column, "Rejected target column: {}", err);
            let status = StageStatus::from_error(&err);
            self.cell.set(status.clone());
            return status;
        }
        self.ctx.session.set(SessionKey::TargetColumn, column);
        info!(column, "Target column selected");
        self.load_profile(false).await
    }

    fn check_target(&self, column: &str) -> Result<()> {
        self.ctx.require_dataset(Stage::Preprocessing)?;
        validate_target_column(column)?;
        let known = match self.cached_dataset() {
            Some(dataset) => dataset.has_column(column),
            None => {
                let options = self.target_options();
                options.is_empty() || options.iter().any(|name| name == column)
            }
        };
        if !known {
            return Err(PipelineError::Validation(format!(
                "'{}' is not a column of this dataset",
                column
            )));
        }
        Ok(())
    }

    /// Apply a preprocessing action to the session dataset.
    ///
    /// Re-applying an action already applied to the same dataset is a no-op.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::MissingPrerequisite`] without a dataset or target column
    /// - whatever the service returns; the action is then marked failed and
    ///   may be applied again
    pub async fn apply(&self, action: PreprocessingAction) -> Result<ActionOutcome> {
        let (dataset_id, target) = self.ctx.require_dataset(Stage::Preprocessing)?;
        let target_column =
            target.ok_or(PipelineError::MissingPrerequisite(Prerequisite::TargetColumn))?;

        let lock = self.mutation_lock(&dataset_id);
        let _serialized = lock.lock().await;

        if self.board.lock().get(&dataset_id, action) == ActionState::Applied {
            info!(dataset_id = %dataset_id, action = action.as_str(), "Action already applied");
            return Ok(ActionOutcome::AlreadyApplied);
        }
        self.board
            .lock()
            .set(&dataset_id, action, ActionState::Applying);

        let previous = self.cell.get();
        let suggested = previous
            .value()
            .is_some_and(|report| report.suggests(action));
        let request = PreprocessRequest {
            dataset_id: dataset_id.clone(),
            target_column: target_column.clone(),
            action,
            categorical_columns: self.categorical_columns(),
        };
        // Leaving the stage while the action is in flight drops the refreshed profile.
        let ticket = self
            .cell
            .begin(RequestParams::new(Some(&dataset_id), Some(&target_column)));
        let outcome = match self.ctx.gateway.preprocess(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(dataset_id = %dataset_id, action = action.as_str(), "Action failed: {}", err);
                self.board
                    .lock()
                    .set(&dataset_id, action, ActionState::Failed(err.to_string()));
                self.cell.settle(ticket, &self.ctx.active_params(), previous);
                return Err(err);
            }
        };

        let removed = self.ctx.cache.invalidate(|key| {
            key.belongs_to(&dataset_id)
                && matches!(
                    key.operation(),
                    Operation::Profile | Operation::Recommendation
                )
        });
        self.update_row_count(&dataset_id, &outcome).await;
        info!(
            dataset_id = %dataset_id,
            action = action.as_str(),
            suggested,
            removed,
            "Action applied, refreshing profile"
        );

        self.fetch_profile(ticket, &dataset_id, Some(&target_column), false)
            .await;
        self.board
            .lock()
            .set(&dataset_id, action, ActionState::Applied);
        Ok(ActionOutcome::Applied(outcome))
    }

    fn mutation_lock(&self, dataset_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.mutations.lock();
        prune_locks(&mut locks, Some(dataset_id));
        locks
            .entry(dataset_id.to_string())
            .or_default()
            .clone()
    }

    fn cached_dataset(&self) -> Option<Dataset> {
        let dataset_id = self.ctx.session.dataset_id()?;
        self.ctx.cache.peek(&CacheKey::dataset(&dataset_id))
    }

    /// From the upload record, or else the profile's column types.
    fn categorical_columns(&self) -> Vec<String> {
        if let Some(dataset) = self.cached_dataset() {
            return dataset.categorical_columns;
        }
        self.cell
            .get()
            .into_value()
            .map(|report| {
                report
                    .column_info
                    .into_iter()
                    .filter(|c| CATEGORICAL_DTYPES.contains(&c.dtype.to_ascii_lowercase().as_str()))
                    .map(|c| c.name)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the cached dataset when the service reports a new row count.
    async fn update_row_count(&self, dataset_id: &str, outcome: &PreprocessOutcome) {
        let Some(rows) = outcome.rows_after_processing else {
            return;
        };
        let key = CacheKey::dataset(dataset_id);
        let Some(mut dataset) = self.ctx.cache.peek::<Dataset>(&key) else {
            return;
        };
        dataset.row_count = rows;
        self.ctx.cache.invalidate(|k| *k == key);
        let stored = self
            .ctx
            .cache
            .get_or_fetch(key, || async move { Ok::<_, PipelineError>(dataset) })
            .await;
        if let Err(err) = stored {
            warn!(dataset_id, "Failed to update cached dataset: {}", err);
        }
    }

    async fn load_profile(&self, bypass: bool) -> StageStatus<ProfilingReport> {
        let (dataset_id, target) = match self.ctx.require_dataset(Stage::Preprocessing) {
            Ok(resolved) => resolved,
            Err(err) => return self.cell.block(&err),
        };
        let ticket = self
            .cell
            .begin(RequestParams::new(Some(&dataset_id), target.as_deref()));
        self.fetch_profile(ticket, &dataset_id, target.as_deref(), bypass)
            .await
    }

    /// Read the profile through the cache and settle it against `ticket`.
    async fn fetch_profile(
        &self,
        ticket: RequestTicket,
        dataset_id: &str,
        target: Option<&str>,
        bypass: bool,
    ) -> StageStatus<ProfilingReport> {
        let key = CacheKey::profile(dataset_id, target);
        let gateway = &self.ctx.gateway;
        let fetch = || gateway.profile(dataset_id, target);
        let result = if bypass {
            self.ctx.cache.refresh(key, fetch).await
        } else {
            self.ctx.cache.get_or_fetch(key, fetch).await
        };

        let status = with_guidance(StageStatus::from_result(result), DATASET_GONE);
        self.cell.settle(ticket, &self.ctx.active_params(), status)
    }
}

#[async_trait]
impl StageController for PreprocessingController {
    type Output = ProfilingReport;

    fn stage(&self) -> Stage {
        Stage::Preprocessing
    }

    fn status(&self) -> StageStatus<ProfilingReport> {
        self.cell.get()
    }

    async fn enter(&self) -> StageStatus<ProfilingReport> {
        self.load_profile(false).await
    }

    async fn refresh(&self) -> StageStatus<ProfilingReport> {
        self.load_profile(true).await
    }

    fn leave(&self) {
        self.cell.cancel();
    }

    fn reset(&self) {
        self.cell.reset();
        *self.board.lock() = ActionBoard::default();
        prune_locks(&mut self.mutations.lock(), None);
    }
}
