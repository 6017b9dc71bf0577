//! Typed access to the remote analysis service.
//!
//! Two layers:
//! - [`RemoteService`] is the raw transport seam, one method per endpoint.
//!   [`HttpService`] implements it over HTTP. Tests plug in scripted fakes.
//! - [`RemoteGateway`] is what stages call. It attaches the session
//!   credential, bounds every call with a deadline, and retries idempotent
//!   reads on remote failures.
//!
//! A call made without a credential fails with
//! [`PipelineError::Unauthenticated`] before the service is touched.
//!
//! # Implementing a New Service
//!
//! Implement [`RemoteService`] for a `Send + Sync` type and hand it to
//! [`RemoteGateway::new`] as an `Arc<dyn RemoteService>`.

mod http;

pub use http::HttpService;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{PipelineError, Result};
use crate::session::{Credential, SessionStore};
use crate::types::{
    Explanation, LogEntry, PreprocessOutcome, PreprocessingAction, ProfilingReport,
    Recommendation, ReportArtifact, ReportFormat, RunResult, SystemStats, UploadReceipt,
};

// ============================================================================
// Request payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
}

/// A tabular file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreprocessRequest {
    pub dataset_id: String,
    pub target_column: String,
    pub action: PreprocessingAction,
    pub categorical_columns: Vec<String>,
}

/// Body shared by the recommend endpoint and other (dataset, target) calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetedRequest {
    pub dataset_id: String,
    pub target_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRequest {
    pub dataset_id: String,
    pub target_column: String,
    pub use_meta_selection: bool,
}

// ============================================================================
// Transport seam
// ============================================================================

/// One method per remote endpoint.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the monitoring stage calls them
/// from background tasks.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<TokenResponse>;

    async fn register(&self, request: &RegisterRequest) -> Result<()>;

    async fn upload(&self, credential: &Credential, file: &UploadFile) -> Result<UploadReceipt>;

    async fn profile(
        &self,
        credential: &Credential,
        dataset_id: &str,
        target_column: Option<&str>,
    ) -> Result<ProfilingReport>;

    async fn preprocess(
        &self,
        credential: &Credential,
        request: &PreprocessRequest,
    ) -> Result<PreprocessOutcome>;

    async fn recommend(
        &self,
        credential: &Credential,
        request: &TargetedRequest,
    ) -> Result<Recommendation>;

    /// Trigger training. Has server-side effects.
    async fn run(&self, credential: &Credential, request: &RunRequest) -> Result<RunResult>;

    /// The persisted result of the last run, or `NotFound`.
    async fn run_result(&self, credential: &Credential, dataset_id: &str) -> Result<RunResult>;

    async fn system_stats(&self, credential: &Credential) -> Result<SystemStats>;

    async fn system_logs(&self, credential: &Credential) -> Result<Vec<LogEntry>>;

    async fn download_report(
        &self,
        credential: &Credential,
        dataset_id: &str,
        format: ReportFormat,
    ) -> Result<Vec<u8>>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "remote"
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Typed wrapper over a [`RemoteService`].
#[derive(Clone)]
pub struct RemoteGateway {
    service: Arc<dyn RemoteService>,
    session: Arc<SessionStore>,
    request_timeout: Duration,
    run_timeout: Duration,
    read_retries: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for RemoteGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteGateway")
            .field("service", &self.service.name())
            .field("request_timeout", &self.request_timeout)
            .field("run_timeout", &self.run_timeout)
            .field("read_retries", &self.read_retries)
            .finish()
    }
}

static_assertions::assert_impl_all!(RemoteGateway: Send, Sync);

impl RemoteGateway {
    pub fn new(
        service: Arc<dyn RemoteService>,
        session: Arc<SessionStore>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            service,
            session,
            request_timeout: config.request_timeout,
            run_timeout: config.run_timeout,
            read_retries: config.read_retries,
            retry_delay: config.retry_delay,
        }
    }

    fn credential(&self) -> Result<Credential> {
        self.session
            .credential()
            .ok_or(PipelineError::Unauthenticated)
    }

    /// Run one attempt under a deadline.
    async fn attempt<T, Fut>(&self, operation: &'static str, deadline: Duration, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        debug!(operation, service = self.service.name(), "Calling remote service");
        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout {
                operation: operation.to_string(),
                after: deadline,
            }),
        }
    }

    /// Run an idempotent read, retrying remote failures.
    async fn read<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match self.attempt(operation, self.request_timeout, call()).await {
                Err(err) if err.is_retryable() && attempt < self.read_retries => {
                    attempt += 1;
                    warn!(operation, attempt, "Retrying after remote failure: {}", err);
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                other => return other,
            }
        }
    }

    /// Exchange email and password for a credential. Needs no prior credential.
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential> {
        let request = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let token = self
            .attempt("login", self.request_timeout, self.service.login(&request))
            .await?;
        if token.access_token.is_empty() {
            return Err(PipelineError::Decode(
                "login response carried an empty token".to_string(),
            ));
        }
        Ok(Credential::new(token.access_token))
    }

    pub async fn register(&self, full_name: &str, email: &str, password: &str) -> Result<()> {
        let request = RegisterRequest {
            full_name: full_name.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        self.attempt("register", self.request_timeout, self.service.register(&request))
            .await
    }

    pub async fn upload(&self, file: &UploadFile) -> Result<UploadReceipt> {
        let credential = self.credential()?;
        self.attempt(
            "upload",
            self.request_timeout,
            self.service.upload(&credential, file),
        )
        .await
    }

    pub async fn profile(
        &self,
        dataset_id: &str,
        target_column: Option<&str>,
    ) -> Result<ProfilingReport> {
        let credential = self.credential()?;
        self.read("profile", || {
            self.service.profile(&credential, dataset_id, target_column)
        })
        .await
    }

    /// Mutates the server-side dataset. Never retried here.
    pub async fn preprocess(&self, request: &PreprocessRequest) -> Result<PreprocessOutcome> {
        let credential = self.credential()?;
        self.attempt(
            "preprocess",
            self.request_timeout,
            self.service.preprocess(&credential, request),
        )
        .await
    }

    pub async fn recommend(&self, dataset_id: &str, target_column: &str) -> Result<Recommendation> {
        let credential = self.credential()?;
        let request = TargetedRequest {
            dataset_id: dataset_id.to_string(),
            target_column: target_column.to_string(),
        };
        self.read("recommend", || self.service.recommend(&credential, &request))
            .await
    }

    /// Explanation of the last run, read from its persisted result.
    pub async fn explanation(&self, dataset_id: &str) -> Result<Explanation> {
        let credential = self.credential()?;
        self.read("explanation", || {
            self.service.run_result(&credential, dataset_id)
        })
        .await
        .map(Explanation::from)
    }

    /// Trigger training. Exactly one attempt, under the run deadline.
    pub async fn run(&self, request: &RunRequest) -> Result<RunResult> {
        let credential = self.credential()?;
        self.attempt("run", self.run_timeout, self.service.run(&credential, request))
            .await
    }

    pub async fn run_result(&self, dataset_id: &str) -> Result<RunResult> {
        let credential = self.credential()?;
        self.read("run_result", || {
            self.service.run_result(&credential, dataset_id)
        })
        .await
    }

    pub async fn system_stats(&self) -> Result<SystemStats> {
        let credential = self.credential()?;
        self.read("system_stats", || self.service.system_stats(&credential))
            .await
    }

    pub async fn system_logs(&self) -> Result<Vec<LogEntry>> {
        let credential = self.credential()?;
        self.read("system_logs", || self.service.system_logs(&credential))
            .await
    }

    pub async fn download_report(
        &self,
        dataset_id: &str,
        format: ReportFormat,
    ) -> Result<ReportArtifact> {
        let credential = self.credential()?;
        let bytes = self
            .read("download_report", || {
                self.service.download_report(&credential, dataset_id, format)
            })
            .await?;
        if bytes.is_empty() {
            return Err(PipelineError::EmptyResult(format!(
                "the service returned an empty {} report",
                format
            )));
        }
        Ok(ReportArtifact {
            format,
            file_name: format.file_name(dataset_id),
            bytes,
        })
    }
}
