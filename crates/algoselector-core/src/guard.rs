//! Route and stage access checks.
//!
//! Two layers:
//! - [`AccessGuard::authorize`] decides a route: dashboard routes need a
//!   credential, and the landing, login and register routes send a signed-in
//!   user on to the dashboard.
//! - [`AccessGuard::require`] is the finer check a stage controller runs on
//!   entry. It resolves the session values the stage depends on or names the
//!   first one that is missing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::session::{Credential, SessionStore};

/// One step of the dashboard pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Preprocessing,
    AlgorithmSelection,
    Insights,
    Explainability,
    Monitoring,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Self::Upload,
        Self::Preprocessing,
        Self::AlgorithmSelection,
        Self::Insights,
        Self::Explainability,
        Self::Monitoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Preprocessing => "preprocessing",
            Self::AlgorithmSelection => "algorithm_selection",
            Self::Insights => "insights",
            Self::Explainability => "explainability",
            Self::Monitoring => "monitoring",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Upload => "Upload",
            Self::Preprocessing => "Preprocessing",
            Self::AlgorithmSelection => "Algorithm Selection",
            Self::Insights => "Insights",
            Self::Explainability => "Explainability",
            Self::Monitoring => "Monitoring",
        }
    }

    /// Session values the stage cannot render without, in check order.
    pub fn requirements(&self) -> &'static [Prerequisite] {
        const SIGNED_IN: &[Prerequisite] = &[Prerequisite::Credential];
        const WITH_DATASET: &[Prerequisite] = &[Prerequisite::Credential, Prerequisite::DatasetId];
        const WITH_TARGET: &[Prerequisite] = &[
            Prerequisite::Credential,
            Prerequisite::DatasetId,
            Prerequisite::TargetColumn,
        ];
        match self {
            Self::Upload | Self::Monitoring => SIGNED_IN,
            Self::Preprocessing | Self::Insights | Self::Explainability => WITH_DATASET,
            Self::AlgorithmSelection => WITH_TARGET,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        if normalized == "selection" {
            return Ok(Stage::AlgorithmSelection);
        }
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// A session value a stage depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Prerequisite {
    Credential,
    DatasetId,
    TargetColumn,
}

impl Prerequisite {
    /// What the user has to do to satisfy it.
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::Credential => "sign in first",
            Self::DatasetId => "upload a dataset first",
            Self::TargetColumn => "select a target column in Preprocessing first",
        }
    }
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.guidance())
    }
}

/// Navigable routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Landing,
    Login,
    Register,
    Dashboard(Stage),
}

impl Route {
    pub fn requires_credential(&self) -> bool {
        matches!(self, Self::Dashboard(_))
    }
}

/// Outcome of [`AccessGuard::authorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    RedirectToLogin,
    RedirectToDashboard,
}

/// Session values resolved for a stage that passed [`AccessGuard::require`].
///
/// Every value listed in the stage's [`Stage::requirements`] is `Some`.
#[derive(Debug, Clone, PartialEq)]
pub struct StageContext {
    pub credential: Credential,
    pub dataset_id: Option<String>,
    pub target_column: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccessGuard {
    session: Arc<SessionStore>,
}

impl AccessGuard {
    pub fn new(session: Arc<SessionStore>) -> Self {
        Self { session }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.credential().is_some()
    }

    pub fn authorize(&self, route: Route) -> RouteDecision {
        match (route.requires_credential(), self.is_authenticated()) {
            (true, false) => RouteDecision::RedirectToLogin,
            (false, true) => RouteDecision::RedirectToDashboard,
            _ => RouteDecision::Allow,
        }
    }

    pub fn require(&self, stage: Stage) -> Result<StageContext, Prerequisite> {
        let session = self.session.snapshot();
        for prerequisite in stage.requirements() {
            let present = match prerequisite {
                Prerequisite::Credential => session.credential.is_some(),
                Prerequisite::DatasetId => session.dataset_id.is_some(),
                Prerequisite::TargetColumn => session.target_column.is_some(),
            };
            if !present {
                return Err(*prerequisite);
            }
        }

        // Every stage requires a credential, so it is present here.
        let credential = session.credential.ok_or(Prerequisite::Credential)?;
        Ok(StageContext {
            credential,
            dataset_id: session.dataset_id,
            target_column: session.target_column,
        })
    }
}
