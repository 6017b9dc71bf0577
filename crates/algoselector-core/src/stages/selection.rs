//! Algorithm selection stage: prior results, recommendations, runs and reports.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{PipelineContext, StageCell, StageController};
use crate::cache::CacheKey;
use crate::error::{PipelineError, Result};
use crate::gateway::RunRequest;
use crate::guard::{Prerequisite, Stage};
use crate::request::RequestParams;
use crate::status::StageStatus;
use crate::types::{Recommendation, ReportFormat, RunResult};

const EMPTY_RUN: &str = "The run finished without training any algorithm. \
Check the target column and preprocessing, then run again.";

/// Dataset ids with a run in flight.
type RunRegistry = Arc<Mutex<HashSet<String>>>;

/// Removes its dataset id from the registry when the run settles or is dropped.
struct RunSlot {
    registry: RunRegistry,
    dataset_id: String,
}

impl RunSlot {
    fn claim(registry: &RunRegistry, dataset_id: &str) -> Option<Self> {
        if !registry.lock().insert(dataset_id.to_string()) {
            return None;
        }
        Some(Self {
            registry: Arc::clone(registry),
            dataset_id: dataset_id.to_string(),
        })
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.dataset_id);
    }
}

pub struct SelectionController {
    ctx: PipelineContext,
    cell: StageCell<RunResult>,
    recommendation: StageCell<Recommendation>,
    running: RunRegistry,
}

impl SelectionController {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            cell: StageCell::new(Stage::AlgorithmSelection),
            recommendation: StageCell::new(Stage::AlgorithmSelection),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// A run is in flight for the session dataset; the trigger is disabled.
    pub fn is_running(&self) -> bool {
        self.ctx
            .session
            .dataset_id()
            .is_some_and(|id| self.running.lock().contains(&id))
    }

    pub fn recommendation_status(&self) -> StageStatus<Recommendation> {
        self.recommendation.get()
    }

    /// Trigger a run for the session (dataset, target).
    ///
    /// Never retried. A second trigger while one is in flight for the same
    /// dataset is rejected, not queued.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::MissingPrerequisite`] without a dataset or target
    /// - [`PipelineError::RunInFlight`] while a run for the dataset is pending
    /// - [`PipelineError::EmptyResult`] when nothing was trained
    /// - the service failure otherwise; the trigger stays enabled
    pub async fn run(&self, use_meta_selection: bool) -> Result<RunResult> {
        let (dataset_id, target_column) = match self.resolve() {
            Ok(resolved) => resolved,
            Err(err) => {
                self.cell.block(&err);
                return Err(err);
            }
        };
        let Some(_slot) = RunSlot::claim(&self.running, &dataset_id) else {
            warn!(dataset_id = %dataset_id, "Run already in flight, ignoring trigger");
            return Err(PipelineError::RunInFlight { dataset_id });
        };

        let ticket = self.cell.begin(RequestParams::new(
            Some(&dataset_id),
            Some(&target_column),
        ));
        info!(
            dataset_id = %dataset_id,
            target = %target_column,
            use_meta_selection,
            "Starting run"
        );
        let request = RunRequest {
            dataset_id: dataset_id.clone(),
            target_column,
            use_meta_selection,
        };

        let result = match self.ctx.gateway.run(&request).await {
            Ok(result) => result,
            Err(err) => {
                warn!(dataset_id = %dataset_id, "Run failed: {}", err);
                self.cell.settle(
                    ticket,
                    &self.ctx.active_params(),
                    StageStatus::from_error(&err),
                );
                return Err(err);
            }
        };

        let run_key = CacheKey::run_result(&dataset_id);
        let explanation_key = CacheKey::explanation(&dataset_id);
        self.ctx
            .cache
            .invalidate(|key| *key == run_key || *key == explanation_key);
        let stored = result.clone();
        self.ctx
            .cache
            .get_or_fetch(run_key, || async move { Ok::<_, PipelineError>(stored) })
            .await?;

        if result.is_empty() {
            info!(dataset_id = %dataset_id, "Run trained no algorithms");
            self.cell.settle(
                ticket,
                &self.ctx.active_params(),
                StageStatus::Empty(EMPTY_RUN.to_string()),
            );
            return Err(PipelineError::EmptyResult(EMPTY_RUN.to_string()));
        }

        info!(
            dataset_id = %dataset_id,
            algorithms = result.algorithms.len(),
            best = result.best_algorithm.as_deref().unwrap_or("-"),
            "Run finished"
        );
        self.cell.settle(
            ticket,
            &self.ctx.active_params(),
            StageStatus::Ready(result.clone()),
        );
        Ok(result)
    }

    /// Recommended algorithms for the session (dataset, target). Cached.
    pub async fn recommend(&self) -> StageStatus<Recommendation> {
        let (dataset_id, target_column) = match self.resolve() {
            Ok(resolved) => resolved,
            Err(err) => return self.recommendation.block(&err),
        };
        let ticket = self.recommendation.begin(RequestParams::new(
            Some(&dataset_id),
            Some(&target_column),
        ));
        let gateway = &self.ctx.gateway;
        let result = self
            .ctx
            .cache
            .get_or_fetch(CacheKey::recommendation(&dataset_id, &target_column), || {
                gateway.recommend(&dataset_id, &target_column)
            })
            .await;
        self.recommendation.settle(
            ticket,
            &self.ctx.active_params(),
            StageStatus::from_result(result),
        )
    }

    /// Download the report for the session dataset into `dir`.
    ///
    /// The artifact is never cached; every call downloads it again.
    pub async fn download_report(&self, format: ReportFormat, dir: &Path) -> Result<PathBuf> {
        let dataset_id = self
            .ctx
            .session
            .dataset_id()
            .ok_or(PipelineError::MissingPrerequisite(Prerequisite::DatasetId))?;
        let artifact = self.ctx.gateway.download_report(&dataset_id, format).await?;

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&artifact.file_name);
        tokio::fs::write(&path, &artifact.bytes).await?;
        info!(
            path = %path.display(),
            bytes = artifact.bytes.len(),
            format = format.as_str(),
            "Report saved"
        );
        Ok(path)
    }

    fn resolve(&self) -> Result<(String, String)> {
        let (dataset_id, target) = self.ctx.require_dataset(Stage::AlgorithmSelection)?;
        let target =
            target.ok_or(PipelineError::MissingPrerequisite(Prerequisite::TargetColumn))?;
        Ok((dataset_id, target))
    }

    /// Silent read of the persisted run result. No prior run is `Idle`.
    async fn load_result(&self, bypass: bool) -> StageStatus<RunResult> {
        let (dataset_id, target_column) = match self.resolve() {
            Ok(resolved) => resolved,
            Err(err) => return self.cell.block(&err),
        };
        // The run settles into the cache; a later read picks it up.
        if self.running.lock().contains(&dataset_id) {
            return StageStatus::Loading;
        }
        let ticket = self.cell.begin(RequestParams::new(
            Some(&dataset_id),
            Some(&target_column),
        ));

        let key = CacheKey::run_result(&dataset_id);
        let gateway = &self.ctx.gateway;
        let fetch = || gateway.run_result(&dataset_id);
        let result = if bypass {
            self.ctx.cache.refresh(key, fetch).await
        } else {
            self.ctx.cache.get_or_fetch(key, fetch).await
        };

        let status = match result {
            Ok(result) if result.is_empty() => StageStatus::Empty(EMPTY_RUN.to_string()),
            Ok(result) => StageStatus::Ready(result),
            Err(err) if err.is_not_found() => StageStatus::Idle,
            Err(err) => StageStatus::from_error(&err),
        };
        self.cell.settle(ticket, &self.ctx.active_params(), status)
    }
}

#[async_trait]
impl StageController for SelectionController {
    type Output = RunResult;

    fn stage(&self) -> Stage {
        Stage::AlgorithmSelection
    }

    fn status(&self) -> StageStatus<RunResult> {
        if self.is_running() {
            return StageStatus::Loading;
        }
        self.cell.get()
    }

    async fn enter(&self) -> StageStatus<RunResult> {
        self.load_result(false).await
    }

    async fn refresh(&self) -> StageStatus<RunResult> {
        self.load_result(true).await
    }

    fn leave(&self) {
        self.cell.cancel();
        self.recommendation.cancel();
    }

    fn reset(&self) {
        self.cell.reset();
        self.recommendation.reset();
    }
}
