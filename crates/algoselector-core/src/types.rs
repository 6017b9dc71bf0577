//! Data model shared by the gateway, the cache and the stages.
//!
//! Field names follow the analysis service's JSON so the same types serve as
//! wire format and domain model. Every optional field is `#[serde(default)]`
//! because the service omits keys it has nothing for.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// One row of a dataset preview, keyed by column name.
pub type PreviewRow = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Datasets
// ============================================================================

/// Name, type and missing-value count of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSummary {
    #[serde(alias = "Column Name")]
    pub name: String,
    #[serde(rename = "type", alias = "Data Type", alias = "dtype")]
    pub dtype: String,
    #[serde(alias = "Missing Values", alias = "null_count", default)]
    pub missing_count: usize,
}

/// An uploaded dataset as the pipeline knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnSummary>,
    /// Columns the service detected as categorical. Sent with every preprocessing request.
    #[serde(default)]
    pub categorical_columns: Vec<String>,
    #[serde(default)]
    pub suggested_target: Option<String>,
    #[serde(default)]
    pub preview: Vec<PreviewRow>,
}

impl Dataset {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn total_missing(&self) -> usize {
        self.columns.iter().map(|c| c.missing_count).sum()
    }
}

/// What the upload endpoint returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub dataset_id: String,
    pub rows: usize,
    pub columns: usize,
    #[serde(default)]
    pub categorical_columns: Vec<String>,
    #[serde(default)]
    pub suggested_target: Option<String>,
    #[serde(default)]
    pub preview: Vec<PreviewRow>,
}

// ============================================================================
// Profiling
// ============================================================================

/// The closed set of preprocessing actions the service can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessingAction {
    /// Impute or drop missing values.
    Missing,
    /// Clip or remove outliers.
    Outliers,
    /// Standardize numeric columns.
    Scaling,
    /// Encode categorical columns.
    Encoding,
}

impl PreprocessingAction {
    pub const ALL: [PreprocessingAction; 4] = [
        Self::Missing,
        Self::Outliers,
        Self::Scaling,
        Self::Encoding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Outliers => "outliers",
            Self::Scaling => "scaling",
            Self::Encoding => "encoding",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Missing => "Handle missing values",
            Self::Outliers => "Treat outliers",
            Self::Scaling => "Scale features",
            Self::Encoding => "Encode categorical features",
        }
    }
}

impl fmt::Display for PreprocessingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown action name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseActionError {
    pub invalid_value: String,
}

impl fmt::Display for ParseActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown preprocessing action '{}', expected one of: missing, outliers, scaling, encoding",
            self.invalid_value
        )
    }
}

impl std::error::Error for ParseActionError {}

impl FromStr for PreprocessingAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "missing" | "missing_values" => Ok(Self::Missing),
            "outliers" | "outlier" => Ok(Self::Outliers),
            "scaling" | "scale" => Ok(Self::Scaling),
            "encoding" | "encode" => Ok(Self::Encoding),
            _ => Err(ParseActionError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

/// A preprocessing step the service recommends, with its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub action: PreprocessingAction,
    pub rationale: String,
}

#[derive(Deserialize)]
struct WireSuggestion {
    action: String,
    #[serde(alias = "reason", default)]
    rationale: String,
}

/// Suggestions naming an action outside the closed set are dropped.
fn known_suggestions<'de, D>(deserializer: D) -> Result<Vec<Suggestion>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<WireSuggestion>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|s| match s.action.parse() {
            Ok(action) => Some(Suggestion {
                action,
                rationale: s.rationale,
            }),
            Err(err) => {
                debug!("Skipping suggestion: {}", err);
                None
            }
        })
        .collect())
}

/// Profile of a dataset for a given (dataset id, target column).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfilingReport {
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub columns: usize,
    #[serde(default)]
    pub total_missing_values: usize,
    #[serde(default)]
    pub column_info: Vec<ColumnSummary>,
    /// Dataset-level statistics such as skewness or class imbalance ratio.
    #[serde(default)]
    pub meta_features: BTreeMap<String, serde_json::Value>,
    #[serde(default, deserialize_with = "known_suggestions")]
    pub preprocessing_suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub preview: Vec<PreviewRow>,
}

impl ProfilingReport {
    /// Numeric value of a meta-feature, if present and numeric.
    pub fn meta_feature(&self, name: &str) -> Option<f64> {
        self.meta_features.get(name).and_then(|v| v.as_f64())
    }

    pub fn suggests(&self, action: PreprocessingAction) -> bool {
        self.preprocessing_suggestions
            .iter()
            .any(|s| s.action == action)
    }
}

/// What the preprocessing endpoint returns after mutating the dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PreprocessOutcome {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub rows_after_processing: Option<usize>,
    #[serde(default)]
    pub preview: Vec<PreviewRow>,
}

// ============================================================================
// Selection
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub name: String,
    pub value: f64,
}

/// One trained algorithm and its scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmScore {
    pub name: String,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub f1_score: f64,
    #[serde(default)]
    pub training_time: f64,
    #[serde(default)]
    pub tradeoffs: String,
    #[serde(default)]
    pub model_size_kb: Option<f64>,
    #[serde(default)]
    pub time_saved_s: Option<f64>,
}

/// Outcome of an AutoML run, persisted server-side per dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default)]
    pub algorithms: Vec<AlgorithmScore>,
    #[serde(default)]
    pub best_algorithm: Option<String>,
    #[serde(default)]
    pub feature_importance: Vec<FeatureImportance>,
    #[serde(default)]
    pub selection_reason: String,
    #[serde(default, alias = "preprocessing_tips")]
    pub tips: Vec<String>,
    #[serde(default)]
    pub reason_parts: Vec<String>,
    #[serde(default)]
    pub target_column: Option<String>,
}

impl RunResult {
    /// A successful run that trained nothing.
    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }

    /// Highest-accuracy algorithm.
    pub fn best(&self) -> Option<&AlgorithmScore> {
        self.algorithms
            .iter()
            .max_by(|a, b| a.accuracy.total_cmp(&b.accuracy))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedAlgorithm {
    pub name: String,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub training_time: f64,
}

/// Meta-learning recommendation for (dataset id, target column).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default)]
    pub top_algorithm: String,
    #[serde(default)]
    pub algorithms: Vec<RecommendedAlgorithm>,
    #[serde(default)]
    pub imbalance_ratio: f64,
    #[serde(default)]
    pub feature_importance: Vec<FeatureImportance>,
    #[serde(default)]
    pub simple_explanation: String,
    #[serde(default)]
    pub reason_parts: Vec<String>,
}

/// Why the best model won, projected from the persisted run result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Explanation {
    pub best_algorithm: Option<String>,
    pub feature_importance: Vec<FeatureImportance>,
    pub selection_reason: String,
    pub reason_parts: Vec<String>,
}

impl From<RunResult> for Explanation {
    fn from(run: RunResult) -> Self {
        let top_scored = run.best().map(|a| a.name.clone());
        let best_algorithm = run
            .best_algorithm
            .filter(|name| name != "None")
            .or(top_scored);
        Self {
            best_algorithm,
            feature_importance: run.feature_importance,
            selection_reason: run.selection_reason,
            reason_parts: run.reason_parts,
        }
    }
}

impl Explanation {
    /// Features sorted by descending importance.
    pub fn ranked_features(&self) -> Vec<&FeatureImportance> {
        let mut ranked: Vec<_> = self.feature_importance.iter().collect();
        ranked.sort_by(|a, b| b.value.total_cmp(&a.value));
        ranked
    }
}

// ============================================================================
// Monitoring
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemStats {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub ram_usage: f64,
    #[serde(default)]
    pub uptime: String,
    #[serde(default)]
    pub active_models: u32,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub action: String,
    pub status: String,
}

// ============================================================================
// Reports
// ============================================================================

/// Report artifact formats offered by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Pdf,
    Docx,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    /// Deterministic client-side file name for a dataset's report.
    pub fn file_name(&self, dataset_id: &str) -> String {
        format!("AlgoSelector_Report_{}.{}", dataset_id, self.as_str())
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" | "word" => Ok(Self::Docx),
            other => Err(format!("unsupported report format '{}'", other)),
        }
    }
}

/// A downloaded report, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub format: ReportFormat,
    pub file_name: String,
    pub bytes: Vec<u8>,
}
