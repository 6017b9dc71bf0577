//! Scripted in-memory analysis service for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use algoselector_core::{
    AlgorithmScore, ClientConfig, ColumnSummary, Credential, Dashboard, FeatureImportance,
    LogEntry, LoginRequest, PipelineError, PreprocessOutcome, PreprocessRequest,
    PreprocessingAction, ProfilingReport, Recommendation, RecommendedAlgorithm, RegisterRequest,
    RemoteService, ReportFormat, Result, RunRequest, RunResult, SessionKey, SessionStore,
    Suggestion, SystemStats, TargetedRequest, TokenResponse, UploadFile, UploadReceipt,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

pub const PASSWORD: &str = "secret";

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Calls per endpoint.
#[derive(Debug, Default)]
pub struct Calls {
    pub login: AtomicUsize,
    pub upload: AtomicUsize,
    pub profile: AtomicUsize,
    pub preprocess: AtomicUsize,
    pub recommend: AtomicUsize,
    pub run: AtomicUsize,
    pub run_result: AtomicUsize,
    pub system_stats: AtomicUsize,
    pub system_logs: AtomicUsize,
    pub download_report: AtomicUsize,
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

pub struct FakeService {
    pub calls: Calls,
    /// Dataset ids handed out by successive uploads.
    upload_ids: Mutex<VecDeque<String>>,
    datasets: Mutex<HashSet<String>>,
    /// Datasets the `missing` action has been applied to.
    missing_fixed: Mutex<HashSet<String>>,
    run_outcome: Mutex<Result<RunResult>>,
    persisted_runs: Mutex<BTreeMap<String, RunResult>>,
    pub fail_preprocess: AtomicBool,
    pub fail_stats: AtomicBool,
    pub fail_logs: AtomicBool,
    profile_gate: Mutex<Option<Arc<Notify>>>,
    run_gate: Mutex<Option<Arc<Notify>>>,
    stats_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Calls::default(),
            upload_ids: Mutex::new(VecDeque::from(["abc123".to_string(), "def456".to_string()])),
            datasets: Mutex::new(HashSet::new()),
            missing_fixed: Mutex::new(HashSet::new()),
            run_outcome: Mutex::new(Ok(trained_run())),
            persisted_runs: Mutex::new(BTreeMap::new()),
            fail_preprocess: AtomicBool::new(false),
            fail_stats: AtomicBool::new(false),
            fail_logs: AtomicBool::new(false),
            profile_gate: Mutex::new(None),
            run_gate: Mutex::new(None),
            stats_gate: Mutex::new(None),
        })
    }

    pub fn set_run_outcome(&self, outcome: Result<RunResult>) {
        *self.run_outcome.lock() = outcome;
    }

    /// Profile calls wait until the returned gate is notified.
    pub fn gate_profiles(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.profile_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn gate_runs(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.run_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn gate_stats(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.stats_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn persist_run(&self, dataset_id: &str, result: RunResult) {
        self.datasets.lock().insert(dataset_id.to_string());
        self.persisted_runs
            .lock()
            .insert(dataset_id.to_string(), result);
    }

    fn known(&self, dataset_id: &str) -> Result<()> {
        if self.datasets.lock().contains(dataset_id) {
            Ok(())
        } else {
            Err(PipelineError::not_found(format!("dataset {}", dataset_id)))
        }
    }
}

async fn pass(gate: Option<Arc<Notify>>) {
    if let Some(gate) = gate {
        gate.notified().await;
    }
    tokio::task::yield_now().await;
}

fn column(name: &str, dtype: &str, missing: usize) -> ColumnSummary {
    ColumnSummary {
        name: name.to_string(),
        dtype: dtype.to_string(),
        missing_count: missing,
    }
}

pub fn trained_run() -> RunResult {
    RunResult {
        algorithms: vec![
            AlgorithmScore {
                name: "RandomForest".to_string(),
                accuracy: 0.91,
                f1_score: 0.89,
                training_time: 1.2,
                tradeoffs: "accurate, slower".to_string(),
                model_size_kb: Some(512.0),
                time_saved_s: None,
            },
            AlgorithmScore {
                name: "LogisticRegression".to_string(),
                accuracy: 0.84,
                f1_score: 0.82,
                training_time: 0.1,
                tradeoffs: "fast, linear".to_string(),
                model_size_kb: Some(4.0),
                time_saved_s: None,
            },
        ],
        best_algorithm: Some("RandomForest".to_string()),
        feature_importance: vec![
            FeatureImportance {
                name: "age".to_string(),
                value: 0.2,
            },
            FeatureImportance {
                name: "fare".to_string(),
                value: 0.6,
            },
        ],
        selection_reason: "Highest accuracy on the validation split".to_string(),
        tips: vec!["Consider scaling fare".to_string()],
        reason_parts: vec!["class balance is moderate".to_string()],
        target_column: Some("y".to_string()),
    }
}

#[async_trait]
impl RemoteService for FakeService {
    async fn login(&self, request: &LoginRequest) -> Result<TokenResponse> {
        self.calls.login.fetch_add(1, Ordering::SeqCst);
        if request.password != PASSWORD {
            return Err(PipelineError::Unauthenticated);
        }
        Ok(TokenResponse {
            access_token: format!("token-for-{}", request.email),
            token_type: "bearer".to_string(),
        })
    }

    async fn register(&self, _: &RegisterRequest) -> Result<()> {
        Ok(())
    }

    async fn upload(&self, _: &Credential, file: &UploadFile) -> Result<UploadReceipt> {
        self.calls.upload.fetch_add(1, Ordering::SeqCst);
        let dataset_id = self
            .upload_ids
            .lock()
            .pop_front()
            .unwrap_or_else(|| "zzz999".to_string());
        self.datasets.lock().insert(dataset_id.clone());
        let rows = String::from_utf8_lossy(&file.bytes).lines().count().saturating_sub(1);
        Ok(UploadReceipt {
            dataset_id,
            rows,
            columns: 4,
            categorical_columns: vec!["city".to_string()],
            suggested_target: Some("y".to_string()),
            preview: Vec::new(),
        })
    }

    async fn profile(
        &self,
        _: &Credential,
        dataset_id: &str,
        target_column: Option<&str>,
    ) -> Result<ProfilingReport> {
        self.calls.profile.fetch_add(1, Ordering::SeqCst);
        let gate = self.profile_gate.lock().clone();
        pass(gate).await;
        self.known(dataset_id)?;

        let fixed = self.missing_fixed.lock().contains(dataset_id);
        let (age_missing, fare_missing) = if fixed { (0, 0) } else { (1, 1) };
        let mut meta_features = BTreeMap::new();
        meta_features.insert("n_rows".to_string(), serde_json::json!(5));
        meta_features.insert(
            "target".to_string(),
            serde_json::json!(target_column.unwrap_or_default()),
        );
        if target_column.is_some() {
            meta_features.insert("class_imbalance_ratio".to_string(), serde_json::json!(1.5));
        }
        let mut suggestions = vec![Suggestion {
            action: PreprocessingAction::Encoding,
            rationale: "city is categorical".to_string(),
        }];
        if !fixed {
            suggestions.insert(
                0,
                Suggestion {
                    action: PreprocessingAction::Missing,
                    rationale: "age and fare have missing values".to_string(),
                },
            );
        }

        Ok(ProfilingReport {
            rows: 5,
            columns: 4,
            total_missing_values: age_missing + fare_missing,
            column_info: vec![
                column("city", "object", 0),
                column("age", "float64", age_missing),
                column("fare", "float64", fare_missing),
                column("y", "int64", 0),
            ],
            meta_features,
            preprocessing_suggestions: suggestions,
            preview: Vec::new(),
        })
    }

    async fn preprocess(
        &self,
        _: &Credential,
        request: &PreprocessRequest,
    ) -> Result<PreprocessOutcome> {
        self.calls.preprocess.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.known(&request.dataset_id)?;
        if self.fail_preprocess.load(Ordering::SeqCst) {
            return Err(PipelineError::Remote {
                status: 500,
                message: "preprocessing crashed".to_string(),
            });
        }
        if request.action == PreprocessingAction::Missing {
            self.missing_fixed
                .lock()
                .insert(request.dataset_id.clone());
        }
        Ok(PreprocessOutcome {
            message: format!("{} applied", request.action.as_str()),
            rows_after_processing: Some(5),
            preview: Vec::new(),
        })
    }

    async fn recommend(
        &self,
        _: &Credential,
        request: &TargetedRequest,
    ) -> Result<Recommendation> {
        self.calls.recommend.fetch_add(1, Ordering::SeqCst);
        self.known(&request.dataset_id)?;
        Ok(Recommendation {
            top_algorithm: "RandomForest".to_string(),
            algorithms: vec![RecommendedAlgorithm {
                name: "RandomForest".to_string(),
                accuracy: 0.9,
                training_time: 1.0,
            }],
            imbalance_ratio: 1.5,
            feature_importance: Vec::new(),
            simple_explanation: format!("Predicting {}", request.target_column),
            reason_parts: Vec::new(),
        })
    }

    async fn run(&self, _: &Credential, request: &RunRequest) -> Result<RunResult> {
        self.calls.run.fetch_add(1, Ordering::SeqCst);
        let gate = self.run_gate.lock().clone();
        pass(gate).await;
        self.known(&request.dataset_id)?;
        let outcome = self.run_outcome.lock().clone();
        if let Ok(result) = &outcome {
            self.persisted_runs
                .lock()
                .insert(request.dataset_id.clone(), result.clone());
        }
        outcome
    }

    async fn run_result(&self, _: &Credential, dataset_id: &str) -> Result<RunResult> {
        self.calls.run_result.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.persisted_runs
            .lock()
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("No results found for this dataset."))
    }

    async fn system_stats(&self, _: &Credential) -> Result<SystemStats> {
        let n = self.calls.system_stats.fetch_add(1, Ordering::SeqCst);
        let gate = self.stats_gate.lock().clone();
        pass(gate).await;
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(PipelineError::Network("connection refused".to_string()));
        }
        Ok(SystemStats {
            cpu_usage: 10.0 + n as f64,
            ram_usage: 40.0,
            uptime: "1h".to_string(),
            active_models: 2,
            total_requests: 100 + n as u64,
            status: "healthy".to_string(),
        })
    }

    async fn system_logs(&self, _: &Credential) -> Result<Vec<LogEntry>> {
        self.calls.system_logs.fetch_add(1, Ordering::SeqCst);
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(PipelineError::Remote {
                status: 503,
                message: "logs unavailable".to_string(),
            });
        }
        Ok(vec![LogEntry {
            timestamp: "2026-10-14T09:00:00".to_string(),
            action: "Dataset uploaded".to_string(),
            status: "success".to_string(),
        }])
    }

    async fn download_report(
        &self,
        _: &Credential,
        dataset_id: &str,
        format: ReportFormat,
    ) -> Result<Vec<u8>> {
        self.calls.download_report.fetch_add(1, Ordering::SeqCst);
        if !self.persisted_runs.lock().contains_key(dataset_id) {
            return Err(PipelineError::not_found("Report"));
        }
        Ok(format!("{} report for {}", format, dataset_id).into_bytes())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::builder()
        .read_retries(0)
        .retry_delay(Duration::ZERO)
        .history_capacity(3)
        .build()
        .unwrap()
}

/// Dashboard over the fake service with an in-memory session.
pub fn dashboard(service: &Arc<FakeService>, session: SessionStore) -> Dashboard {
    Dashboard::new(test_config(), service.clone(), Arc::new(session))
}

pub fn signed_in(service: &Arc<FakeService>) -> Dashboard {
    let session = SessionStore::in_memory();
    session.set(SessionKey::Credential, "token-for-tests");
    dashboard(service, session)
}

/// Yield until `condition` holds.
pub async fn until(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
