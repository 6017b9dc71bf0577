//! HTTP implementation of [`RemoteService`] on top of `reqwest`.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    LoginRequest, PreprocessRequest, RegisterRequest, RemoteService, RunRequest, TargetedRequest,
    TokenResponse, UploadFile,
};
use crate::config::ClientConfig;
use crate::error::{PipelineError, Result};
use crate::session::Credential;
use crate::types::{
    LogEntry, PreprocessOutcome, ProfilingReport, Recommendation, ReportFormat, RunResult,
    SystemStats, UploadReceipt,
};

const CSV_MIME: &str = "text/csv";

/// Talks JSON (and multipart for uploads) to the analysis service.
#[derive(Debug, Clone)]
pub struct HttpService {
    client: Client,
    config: ClientConfig,
}

impl HttpService {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn get(&self, credential: &Credential, path: &str) -> RequestBuilder {
        self.client
            .get(self.config.endpoint(path))
            .bearer_auth(credential.expose())
            .timeout(self.config.request_timeout)
    }

    fn post(&self, credential: Option<&Credential>, path: &str) -> RequestBuilder {
        let request = self
            .client
            .post(self.config.endpoint(path))
            .timeout(self.config.request_timeout);
        match credential {
            Some(credential) => request.bearer_auth(credential.expose()),
            None => request,
        }
    }

    fn report_request(
        &self,
        credential: &Credential,
        dataset_id: &str,
        format: ReportFormat,
    ) -> RequestBuilder {
        self.get(credential, &format!("/report/download/{}", dataset_id))
            .query(&[("format", format.as_str())])
            .header(ACCEPT, format.content_type())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(transport_error)?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&body).map_err(PipelineError::from)
    }
}

#[async_trait]
impl RemoteService for HttpService {
    async fn login(&self, request: &LoginRequest) -> Result<TokenResponse> {
        self.send_json(self.post(None, "/auth/login").json(request))
            .await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<()> {
        self.send(self.post(None, "/auth/register").json(request))
            .await
            .map(|_| ())
    }

    async fn upload(&self, credential: &Credential, file: &UploadFile) -> Result<UploadReceipt> {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(CSV_MIME)?;
        let form = Form::new().part("file", part);
        debug!(file = %file.file_name, bytes = file.bytes.len(), "Uploading dataset");
        self.send_json(self.post(Some(credential), "/upload/").multipart(form))
            .await
    }

    async fn profile(
        &self,
        credential: &Credential,
        dataset_id: &str,
        target_column: Option<&str>,
    ) -> Result<ProfilingReport> {
        let mut request = self.get(credential, &format!("/profiling/{}", dataset_id));
        if let Some(target) = target_column.filter(|t| !t.is_empty()) {
            request = request.query(&[("target_column", target)]);
        }
        self.send_json(request).await
    }

    async fn preprocess(
        &self,
        credential: &Credential,
        request: &PreprocessRequest,
    ) -> Result<PreprocessOutcome> {
        self.send_json(self.post(Some(credential), "/preprocess/").json(request))
            .await
    }

    async fn recommend(
        &self,
        credential: &Credential,
        request: &TargetedRequest,
    ) -> Result<Recommendation> {
        self.send_json(self.post(Some(credential), "/recommend/").json(request))
            .await
    }

    async fn run(&self, credential: &Credential, request: &RunRequest) -> Result<RunResult> {
        let request = self
            .post(Some(credential), "/automl/run")
            .timeout(self.config.run_timeout)
            .json(request);
        self.send_json(request).await
    }

    async fn run_result(&self, credential: &Credential, dataset_id: &str) -> Result<RunResult> {
        self.send_json(self.get(credential, &format!("/automl/results/{}", dataset_id)))
            .await
    }

    async fn system_stats(&self, credential: &Credential) -> Result<SystemStats> {
        self.send_json(self.get(credential, "/system/stats")).await
    }

    async fn system_logs(&self, credential: &Credential) -> Result<Vec<LogEntry>> {
        self.send_json(self.get(credential, "/system/logs")).await
    }

    async fn download_report(
        &self,
        credential: &Credential,
        dataset_id: &str,
        format: ReportFormat,
    ) -> Result<Vec<u8>> {
        let request = self.report_request(credential, dataset_id, format);
        let response = self.send(request).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &str {
        "http"
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Map a non-success status and its body to a pipeline error.
pub(crate) fn status_error(status: StatusCode, body: &str) -> PipelineError {
    let detail = error_detail(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });

    match status.as_u16() {
        401 | 403 => PipelineError::Unauthenticated,
        404 => PipelineError::NotFound { resource: detail },
        400 | 409 | 413 | 415 | 422 => PipelineError::Validation(detail),
        code => PipelineError::Remote {
            status: code,
            message: detail,
        },
    }
}

/// The service reports errors as `{"detail": ...}`; fall back to the raw body.
fn error_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => Some(body.to_string()),
        },
        _ => Some(body.to_string()),
    }
}

fn transport_error(err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::Network(format!("request timed out: {}", err))
    } else {
        PipelineError::from(err)
    }
}
