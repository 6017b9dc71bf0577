//! Durable session state.
//!
//! The [`Session`] holds the three values that must survive a reload: the
//! credential, the active dataset id and the chosen target column. The
//! [`SessionStore`] owns it exclusively.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ SessionStore                                 │
//! │  state: RwLock<Session>                      │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ credential     Option<Credential>      │  │
//! │  │ dataset_id     Option<String>          │  │
//! │  │ target_column  Option<String>  (needs  │  │
//! │  │                dataset_id)             │  │
//! │  └────────────────────────────────────────┘  │
//! │  path: Option<PathBuf>  ── JSON snapshot     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Durability
//!
//! Every write replaces the whole snapshot on disk (temp file, then rename)
//! while the write lock is held, so the file only ever holds a state that
//! also existed in memory. [`SessionStore::clear_all`] is a single write.
//!
//! # Failure Model
//!
//! No operation fails. An unreadable snapshot loads as an empty session and a
//! failed write is logged; the in-memory state stays authoritative.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PipelineError;

/// Longest target column name accepted from persisted state.
pub const MAX_TARGET_COLUMN_LEN: usize = 100;

/// Opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// The keys a [`SessionStore`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Credential,
    DatasetId,
    TargetColumn,
}

impl SessionKey {
    pub const ALL: [SessionKey; 3] = [Self::Credential, Self::DatasetId, Self::TargetColumn];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::DatasetId => "dataset_id",
            Self::TargetColumn => "target_column",
        }
    }
}

/// The persisted session values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub target_column: Option<String>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.credential.is_none() && self.dataset_id.is_none() && self.target_column.is_none()
    }

    /// Drop values that break the session invariants.
    fn sanitized(mut self) -> Self {
        if self.dataset_id.as_deref().is_some_and(str::is_empty) {
            self.dataset_id = None;
        }
        if self.dataset_id.is_none() {
            self.target_column = None;
        }
        if let Some(target) = self.target_column.take() {
            match validate_target_column(&target) {
                Ok(()) => self.target_column = Some(target),
                Err(err) => warn!("Discarding stored target column: {}", err),
            }
        }
        self
    }
}

/// Check that a target column name is safe to keep and send.
///
/// Rejects empty names, names over [`MAX_TARGET_COLUMN_LEN`] characters and
/// names containing `;` or `"`.
pub fn validate_target_column(name: &str) -> Result<(), PipelineError> {
    if name.trim().is_empty() {
        return Err(PipelineError::Validation(
            "target column must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_TARGET_COLUMN_LEN {
        return Err(PipelineError::Validation(format!(
            "target column name is longer than {} characters",
            MAX_TARGET_COLUMN_LEN
        )));
    }
    if name.contains(';') || name.contains('"') {
        return Err(PipelineError::Validation(
            "target column name contains forbidden characters".to_string(),
        ));
    }
    Ok(())
}

/// Owner of the [`Session`].
#[derive(Debug)]
pub struct SessionStore {
    state: RwLock<Session>,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(Session::default()),
            path: None,
        }
    }

    /// Open a file-backed store, loading any existing snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let session = load_snapshot(&path);
        debug!(path = %path.display(), empty = session.is_empty(), "Session store opened");
        Self {
            state: RwLock::new(session),
            path: Some(path),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read a value as a string. Absent keys return `None`.
    pub fn get(&self, key: SessionKey) -> Option<String> {
        let state = self.state.read();
        match key {
            SessionKey::Credential => state.credential.as_ref().map(|c| c.expose().to_string()),
            SessionKey::DatasetId => state.dataset_id.clone(),
            SessionKey::TargetColumn => state.target_column.clone(),
        }
    }

    pub fn credential(&self) -> Option<Credential> {
        self.state.read().credential.clone()
    }

    pub fn dataset_id(&self) -> Option<String> {
        self.state.read().dataset_id.clone()
    }

    pub fn target_column(&self) -> Option<String> {
        self.state.read().target_column.clone()
    }

    pub fn snapshot(&self) -> Session {
        self.state.read().clone()
    }

    /// Write a value. An empty value clears the key.
    ///
    /// Setting a different dataset id clears the target column. Setting a
    /// target column without a dataset, or one that fails
    /// [`validate_target_column`], is ignored.
    pub fn set(&self, key: SessionKey, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.clear(key);
            return;
        }

        let mut state = self.state.write();
        match key {
            SessionKey::Credential => state.credential = Some(Credential::new(value)),
            SessionKey::DatasetId => {
                if state.dataset_id.as_deref() != Some(value.as_str()) {
                    state.target_column = None;
                }
                state.dataset_id = Some(value);
            }
            SessionKey::TargetColumn => {
                if state.dataset_id.is_none() {
                    warn!("Ignoring target column '{}': no dataset in session", value);
                    return;
                }
                if let Err(err) = validate_target_column(&value) {
                    warn!("Ignoring target column: {}", err);
                    return;
                }
                state.target_column = Some(value);
            }
        }
        self.persist(&state);
    }

    /// Remove a value. Clearing the dataset id also clears the target column.
    pub fn clear(&self, key: SessionKey) {
        let mut state = self.state.write();
        match key {
            SessionKey::Credential => state.credential = None,
            SessionKey::DatasetId => {
                state.dataset_id = None;
                state.target_column = None;
            }
            SessionKey::TargetColumn => state.target_column = None,
        }
        self.persist(&state);
    }

    /// Remove every value in one step. Used on logout.
    pub fn clear_all(&self) {
        let mut state = self.state.write();
        *state = Session::default();
        self.persist(&state);
        info!("Session cleared");
    }

    fn persist(&self, session: &Session) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = write_snapshot(path, session) {
            warn!(path = %path.display(), "Failed to persist session: {}", err);
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn load_snapshot(path: &Path) -> Session {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Session::default(),
        Err(err) => {
            warn!(path = %path.display(), "Failed to read session file: {}", err);
            return Session::default();
        }
    };

    match serde_json::from_str::<Session>(&contents) {
        Ok(session) => session.sanitized(),
        Err(err) => {
            warn!(path = %path.display(), "Ignoring corrupt session file: {}", err);
            Session::default()
        }
    }
}

fn write_snapshot(path: &Path, session: &Session) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(session)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

static_assertions::assert_impl_all!(SessionStore: Send, Sync);
