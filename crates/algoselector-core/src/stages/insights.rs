//! Insights stage: read-only view of the dataset profile.

use async_trait::async_trait;

use super::{PipelineContext, StageCell, StageController, with_guidance};
use crate::cache::CacheKey;
use crate::guard::Stage;
use crate::request::RequestParams;
use crate::status::StageStatus;
use crate::types::ProfilingReport;

const NOT_PROFILED: &str =
    "Insights are not available yet. Upload a dataset and open Preprocessing first.";

/// Shares the profile cache entry with the preprocessing stage.
pub struct InsightsController {
    ctx: PipelineContext,
    cell: StageCell<ProfilingReport>,
}

impl InsightsController {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            cell: StageCell::new(Stage::Insights),
        }
    }

    async fn load(&self, bypass: bool) -> StageStatus<ProfilingReport> {
        let (dataset_id, target) = match self.ctx.require_dataset(Stage::Insights) {
            Ok(resolved) => resolved,
            Err(err) => return self.cell.block(&err),
        };
        let ticket = self
            .cell
            .begin(RequestParams::new(Some(&dataset_id), target.as_deref()));

        let key = CacheKey::profile(&dataset_id, target.as_deref());
        let gateway = &self.ctx.gateway;
        let fetch = || gateway.profile(&dataset_id, target.as_deref());
        let result = if bypass {
            self.ctx.cache.refresh(key, fetch).await
        } else {
            self.ctx.cache.get_or_fetch(key, fetch).await
        };

        let status = with_guidance(StageStatus::from_result(result), NOT_PROFILED);
        self.cell.settle(ticket, &self.ctx.active_params(), status)
    }
}

#[async_trait]
impl StageController for InsightsController {
    type Output = ProfilingReport;

    fn stage(&self) -> Stage {
        Stage::Insights
    }

    fn status(&self) -> StageStatus<ProfilingReport> {
        self.cell.get()
    }

    async fn enter(&self) -> StageStatus<ProfilingReport> {
        self.load(false).await
    }

    async fn refresh(&self) -> StageStatus<ProfilingReport> {
        self.load(true).await
    }

    fn leave(&self) {
        self.cell.cancel();
    }

    fn reset(&self) {
        self.cell.reset();
    }
}
