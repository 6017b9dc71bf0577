//! algoselector-core: pipeline orchestration for the AlgoSelector dashboard.
//!
//! This crate is the client-side core of a multi-stage AutoML workflow run
//! against a remote analysis service: upload a dataset, profile it, apply
//! preprocessing, run algorithm selection, then inspect and download the
//! results. It tracks the session, sequences remote calls, caches their
//! results and turns every outcome into a renderable stage status. It does
//! no data science itself.
//!
//! # Features
//!
//! - **Durable Session**: credential, dataset id and target column survive restarts
//! - **Result Cache**: one cached result per (operation, parameters), with de-duplicated fetches
//! - **Typed Gateway**: one method per endpoint, deadlines, retries for reads only
//! - **Stage Controllers**: prerequisite checks and stale-response guards per stage
//! - **Background Monitoring**: two polling loops with a bounded history
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use algoselector_core::{ClientConfig, Dashboard, PreprocessingAction, SessionStore, StageController};
//!
//! let config = ClientConfig::builder()
//!     .base_url("http://127.0.0.1:8000")
//!     .build()?;
//! let dashboard = Dashboard::connect(config, SessionStore::open("session.json"))?;
//!
//! dashboard.login("user@example.com", "secret").await?;
//! dashboard.upload().upload("titanic.csv".as_ref()).await;
//! dashboard.preprocessing().select_target("Survived").await;
//! dashboard.preprocessing().apply(PreprocessingAction::Missing).await?;
//!
//! let result = dashboard.selection().run(true).await?;
//! println!("best: {:?}", result.best_algorithm);
//! ```
//!
//! # Architecture
//!
//! ```text
//!  AccessGuard ──► StageController ──► ResultCache ──► RemoteGateway
//!       │                │                                   │
//!       └──────────► SessionStore ◄───────────── credential ─┘
//!                                                            │
//!                                                RemoteService (trait)
//!                                                            │
//!                                          HttpService (reqwest), test fakes
//! ```
//!
//! # Error Handling
//!
//! Fallible operations return [`Result<T>`] with a [`PipelineError`]. Each
//! error falls into one [`ErrorKind`]:
//!
//! - [`ErrorKind::Unauthenticated`] - no credential, or the service refused it
//! - [`ErrorKind::NotFound`] - an artifact that has not been produced yet
//! - [`ErrorKind::ValidationFailure`] - bad input, rejected locally or remotely
//! - [`ErrorKind::RemoteFailure`] - network or server fault, retryable
//! - [`ErrorKind::EmptyResult`] - success without usable output, not retried
//!
//! Stage controllers never return raw errors from `enter`/`refresh`; they
//! render them as a [`StageStatus`].
//!
//! # Thread Safety
//!
//! Every handle is `Send + Sync`. Controllers may be shared across tasks;
//! the monitoring stage polls from its own spawned tasks.

mod cache;
mod config;
mod dashboard;
mod error;
mod gateway;
mod guard;
mod request;
mod session;
mod stages;
mod status;
pub mod tabular;
mod types;

// Re-export public API
//
// Configuration
pub use config::{ClientConfig, ClientConfigBuilder};
// Errors
pub use error::{ErrorKind, PipelineError, Result};
// Session state
pub use session::{
    Credential, MAX_TARGET_COLUMN_LEN, Session, SessionKey, SessionStore, validate_target_column,
};
// Cache
pub use cache::{CacheKey, Operation, ResultCache};
// Remote boundary
pub use gateway::{
    HttpService, LoginRequest, PreprocessRequest, RegisterRequest, RemoteGateway, RemoteService,
    RunRequest, TargetedRequest, TokenResponse, UploadFile,
};
// Access control
pub use guard::{AccessGuard, Prerequisite, Route, RouteDecision, Stage, StageContext};
// Request lifecycles
pub use request::{RequestParams, RequestState, RequestTicket, StaleGuard};
// Stage status and controllers
pub use stages::{
    ActionOutcome, ActionState, BoundedHistory, ExplainabilityController, InsightsController,
    MonitoringController, MonitoringSnapshot, PipelineContext, PreprocessingController,
    SelectionController, StageController, StatsSample, UploadController,
};
pub use status::StageStatus;
// Domain types
pub use types::{
    AlgorithmScore, ColumnSummary, Dataset, Explanation, FeatureImportance, LogEntry,
    ParseActionError, PreprocessOutcome, PreprocessingAction, PreviewRow, ProfilingReport,
    Recommendation, RecommendedAlgorithm, ReportArtifact, ReportFormat, RunResult, Suggestion,
    SystemStats, UploadReceipt,
};
// Root object
pub use dashboard::Dashboard;

static_assertions::assert_impl_all!(Dashboard: Send, Sync);
