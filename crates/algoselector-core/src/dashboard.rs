//! The root object wiring session, gateway, cache and stage controllers.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::cache::ResultCache;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::gateway::{HttpService, RemoteGateway, RemoteService};
use crate::guard::{AccessGuard, Route, RouteDecision, Stage};
use crate::session::{SessionKey, SessionStore};
use crate::stages::{
    ExplainabilityController, InsightsController, MonitoringController, PipelineContext,
    PreprocessingController, SelectionController, StageController, UploadController,
};

/// One user's pipeline: a session plus one controller per stage.
///
/// # Example
///
/// ```no_run
/// use algoselector_core::{ClientConfig, Dashboard, SessionStore, StageController};
///
/// # async fn demo() -> algoselector_core::Result<()> {
/// let dashboard = Dashboard::connect(ClientConfig::default(), SessionStore::open("session.json"))?;
/// dashboard.login("user@example.com", "secret").await?;
/// let status = dashboard.preprocessing().enter().await;
/// println!("{}", status.as_str());
/// # Ok(())
/// # }
/// ```
pub struct Dashboard {
    ctx: PipelineContext,
    upload: UploadController,
    preprocessing: PreprocessingController,
    selection: SelectionController,
    insights: InsightsController,
    explainability: ExplainabilityController,
    monitoring: MonitoringController,
    current: RwLock<Option<Stage>>,
}

impl Dashboard {
    pub fn new(
        config: ClientConfig,
        service: Arc<dyn RemoteService>,
        session: Arc<SessionStore>,
    ) -> Self {
        let ctx = PipelineContext {
            gateway: RemoteGateway::new(service, Arc::clone(&session), &config),
            guard: AccessGuard::new(Arc::clone(&session)),
            cache: Arc::new(ResultCache::new()),
            session,
            config,
        };
        Self {
            upload: UploadController::new(ctx.clone()),
            preprocessing: PreprocessingController::new(ctx.clone()),
            selection: SelectionController::new(ctx.clone()),
            insights: InsightsController::new(ctx.clone()),
            explainability: ExplainabilityController::new(ctx.clone()),
            monitoring: MonitoringController::new(ctx.clone()),
            current: RwLock::new(None),
            ctx,
        }
    }

    /// A dashboard talking HTTP to `config.base_url`.
    pub fn connect(config: ClientConfig, session: SessionStore) -> Result<Self> {
        let service = HttpService::new(&config)?;
        Ok(Self::new(config, Arc::new(service), Arc::new(session)))
    }

    pub fn session(&self) -> &SessionStore {
        &self.ctx.session
    }

    pub fn cache(&self) -> &ResultCache {
        &self.ctx.cache
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.ctx.guard
    }

    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    pub fn upload(&self) -> &UploadController {
        &self.upload
    }

    pub fn preprocessing(&self) -> &PreprocessingController {
        &self.preprocessing
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub fn insights(&self) -> &InsightsController {
        &self.insights
    }

    pub fn explainability(&self) -> &ExplainabilityController {
        &self.explainability
    }

    pub fn monitoring(&self) -> &MonitoringController {
        &self.monitoring
    }

    pub fn authorize(&self, route: Route) -> RouteDecision {
        self.ctx.guard.authorize(route)
    }

    pub fn current_stage(&self) -> Option<Stage> {
        *self.current.read()
    }

    /// Switch to `stage`, leaving the previous one so its late responses are dropped.
    ///
    /// The caller enters the new stage's controller afterwards.
    pub fn open(&self, stage: Stage) -> RouteDecision {
        let decision = self.authorize(Route::Dashboard(stage));
        if decision != RouteDecision::Allow {
            return decision;
        }
        let previous = self.current.write().replace(stage);
        if let Some(previous) = previous.filter(|p| *p != stage) {
            self.leave(previous);
        }
        decision
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let credential = self.ctx.gateway.login(email, password).await?;
        self.ctx
            .session
            .set(SessionKey::Credential, credential.expose());
        info!("Signed in");
        Ok(())
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, full_name: &str, email: &str, password: &str) -> Result<()> {
        self.ctx.gateway.register(full_name, email, password).await?;
        info!("Account registered");
        Ok(())
    }

    /// Clear the session, drop every cached result and stop background work.
    pub fn logout(&self) {
        self.ctx.session.clear_all();
        let removed = self.ctx.cache.invalidate_all();
        for stage in Stage::ALL {
            self.reset(stage);
        }
        *self.current.write() = None;
        info!(removed, "Signed out");
    }

    fn leave(&self, stage: Stage) {
        match stage {
            Stage::Upload => self.upload.leave(),
            Stage::Preprocessing => self.preprocessing.leave(),
            Stage::AlgorithmSelection => self.selection.leave(),
            Stage::Insights => self.insights.leave(),
            Stage::Explainability => self.explainability.leave(),
            Stage::Monitoring => self.monitoring.leave(),
        }
    }

    fn reset(&self, stage: Stage) {
        match stage {
            Stage::Upload => self.upload.reset(),
            Stage::Preprocessing => self.preprocessing.reset(),
            Stage::AlgorithmSelection => self.selection.reset(),
            Stage::Insights => self.insights.reset(),
            Stage::Explainability => self.explainability.reset(),
            Stage::Monitoring => self.monitoring.reset(),
        }
    }
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("gateway", &self.ctx.gateway)
            .field("cache", &self.ctx.cache)
            .field("current", &self.current_stage())
            .finish()
    }
}
