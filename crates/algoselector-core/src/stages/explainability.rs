//! Explainability stage: why the last run picked its algorithm.

use async_trait::async_trait;
use tracing::debug;

use super::{PipelineContext, StageCell, StageController, with_guidance};
use crate::cache::CacheKey;
use crate::guard::Stage;
use crate::request::RequestParams;
use crate::status::StageStatus;
use crate::types::{Explanation, RunResult};

const NOT_RUN: &str = "No explanation yet. Run algorithm selection for this dataset first.";

pub struct ExplainabilityController {
    ctx: PipelineContext,
    cell: StageCell<Explanation>,
}

impl ExplainabilityController {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            cell: StageCell::new(Stage::Explainability),
        }
    }

    async fn load(&self, bypass: bool) -> StageStatus<Explanation> {
        let (dataset_id, _) = match self.ctx.require_dataset(Stage::Explainability) {
            Ok(resolved) => resolved,
            Err(err) => return self.cell.block(&err),
        };
        // Keyed by dataset only; a target change does not make it stale.
        let ticket = self
            .cell
            .begin(RequestParams::new(Some(&dataset_id), None));

        let key = CacheKey::explanation(&dataset_id);
        let run_key = CacheKey::run_result(&dataset_id);
        let run_key = &run_key;
        let dataset_id = dataset_id.as_str();
        let cache = self.ctx.cache.as_ref();
        let gateway = &self.ctx.gateway;
        let fetch = move || async move {
            // A run result already read by Selection answers without a call.
            if !bypass {
                if let Some(run) = cache.peek::<RunResult>(run_key) {
                    debug!(dataset_id, "Explanation projected from cached run");
                    return Ok(Explanation::from(run));
                }
            }
            gateway.explanation(dataset_id).await
        };
        let result = if bypass {
            self.ctx.cache.refresh(key, fetch).await
        } else {
            self.ctx.cache.get_or_fetch(key, fetch).await
        };

        let status = with_guidance(StageStatus::from_result(result), NOT_RUN);
        self.cell
            .settle(ticket, &self.ctx.active_params().dataset_only(), status)
    }
}

#[async_trait]
impl StageController for ExplainabilityController {
    type Output = Explanation;

    fn stage(&self) -> Stage {
        Stage::Explainability
    }

    fn status(&self) -> StageStatus<Explanation> {
        self.cell.get()
    }

    async fn enter(&self) -> StageStatus<Explanation> {
        self.load(false).await
    }

    async fn refresh(&self) -> StageStatus<Explanation> {
        self.load(true).await
    }

    fn leave(&self) {
        self.cell.cancel();
    }

    fn reset(&self) {
        self.cell.reset();
    }
}
