//! Upload stage: validate a local table, send it, record the new dataset.

use std::path::Path;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{PipelineContext, StageCell, StageController};
use crate::cache::CacheKey;
use crate::error::{PipelineError, Result};
use crate::gateway::UploadFile;
use crate::guard::Stage;
use crate::session::SessionKey;
use crate::status::StageStatus;
use crate::tabular::{self, TableSummary};
use crate::types::{Dataset, UploadReceipt};

/// Polars dtype name of text columns.
const TEXT_DTYPE: &str = "String";

pub struct UploadController {
    ctx: PipelineContext,
    cell: StageCell<Dataset>,
}

impl UploadController {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            cell: StageCell::new(Stage::Upload),
        }
    }

    /// The dataset currently in the session, if it is cached.
    pub fn current_dataset(&self) -> Option<Dataset> {
        let dataset_id = self.ctx.session.dataset_id()?;
        self.ctx.cache.peek(&CacheKey::dataset(&dataset_id))
    }

    /// Validate a local file, upload it and make it the session dataset.
    ///
    /// A file that fails local validation is never sent. On success, every
    /// cached result of the previous dataset is invalidated.
    pub async fn upload(&self, path: &Path) -> StageStatus<Dataset> {
        match self.try_upload(path).await {
            Ok(dataset) => {
                let status = StageStatus::Ready(dataset);
                self.cell.set(status.clone());
                status
            }
            Err(err) => {
                warn!(path = %path.display(), "Upload failed: {}", err);
                let status = StageStatus::from_error(&err);
                self.cell.set(status.clone());
                status
            }
        }
    }

    async fn try_upload(&self, path: &Path) -> Result<Dataset> {
        self.ctx.require(Stage::Upload)?;
        let summary = tabular::inspect_csv(path)?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset.csv".to_string());

        self.cell.set(StageStatus::Loading);
        let receipt = self
            .ctx
            .gateway
            .upload(&UploadFile { file_name, bytes })
            .await?;
        if receipt.dataset_id.is_empty() {
            return Err(PipelineError::Decode(
                "upload response carried no dataset id".to_string(),
            ));
        }

        let previous = self.ctx.session.dataset_id();
        self.ctx
            .session
            .set(SessionKey::DatasetId, receipt.dataset_id.clone());
        if let Some(previous) = previous.filter(|id| *id != receipt.dataset_id) {
            let removed = self.ctx.cache.invalidate_dataset(&previous);
            info!(previous = %previous, removed, "Replaced session dataset");
        }
        self.ctx.cache.invalidate_dataset(&receipt.dataset_id);

        let dataset = build_dataset(receipt, summary);
        let cached = dataset.clone();
        self.ctx
            .cache
            .get_or_fetch(CacheKey::dataset(&dataset.id), || async move {
                Ok::<_, PipelineError>(cached)
            })
            .await?;

        info!(
            dataset_id = %dataset.id,
            rows = dataset.row_count,
            columns = dataset.column_count,
            "Dataset uploaded"
        );
        Ok(dataset)
    }

    fn current_status(&self) -> StageStatus<Dataset> {
        match self.current_dataset() {
            Some(dataset) => StageStatus::Ready(dataset),
            None => StageStatus::Idle,
        }
    }
}

/// Merge the service receipt with the local column summary.
fn build_dataset(receipt: UploadReceipt, summary: TableSummary) -> Dataset {
    let categorical_columns = if receipt.categorical_columns.is_empty() {
        summary
            .columns
            .iter()
            .filter(|column| column.dtype == TEXT_DTYPE)
            .map(|column| column.name.clone())
            .collect()
    } else {
        receipt.categorical_columns
    };
    let row_count = if receipt.rows > 0 {
        receipt.rows
    } else {
        summary.row_count
    };
    let column_count = if receipt.columns > 0 {
        receipt.columns
    } else {
        summary.column_count()
    };

    Dataset {
        id: receipt.dataset_id,
        row_count,
        column_count,
        columns: summary.columns,
        categorical_columns,
        suggested_target: receipt.suggested_target,
        preview: receipt.preview,
    }
}

#[async_trait]
impl StageController for UploadController {
    type Output = Dataset;

    fn stage(&self) -> Stage {
        Stage::Upload
    }

    fn status(&self) -> StageStatus<Dataset> {
        self.cell.get()
    }

    async fn enter(&self) -> StageStatus<Dataset> {
        if let Err(err) = self.ctx.require(Stage::Upload) {
            return self.cell.block(&err);
        }
        // The dataset is recorded locally at upload time; there is no remote read.
        let ticket = self.cell.begin(self.ctx.active_params());
        let status = self.current_status();
        self.cell.settle(ticket, &self.ctx.active_params(), status)
    }

    async fn refresh(&self) -> StageStatus<Dataset> {
        self.enter().await
    }

    fn leave(&self) {
        self.cell.cancel();
    }

    fn reset(&self) {
        self.cell.reset();
    }
}
