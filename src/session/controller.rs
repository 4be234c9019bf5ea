use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use log::{info, warn};
use sysinfo::System;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{
    models::{Session, SessionStatus},
    Database,
};
use crate::settings::SettingsStore;

/// Characters a session name may not contain; session names double as
/// directory names on export.
pub const ILLEGAL_NAME_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session name is empty")]
    EmptyName,
    #[error("session name contains illegal character '{0}'")]
    IllegalCharacter(char),
    #[error("a session named '{0}' already exists")]
    Duplicate(String),
    #[error("session {0} is still open")]
    AlreadyOpen(String),
    #[error("no session is open")]
    NoneOpen,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Trims `name` and checks it, reporting the first illegal character.
pub fn validate_name(name: &str) -> Result<&str, SessionError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SessionError::EmptyName);
    }
    match name.chars().find(|c| ILLEGAL_NAME_CHARS.contains(c)) {
        Some(illegal) => Err(SessionError::IllegalCharacter(illegal)),
        None => Ok(name),
    }
}

/// Free-text description of the device, stored with each session.
pub fn device_info() -> String {
    let unknown = || "unknown".to_string();
    format!(
        "{} {} (kernel {}, host {})",
        System::name().unwrap_or_else(unknown),
        System::os_version().unwrap_or_else(unknown),
        System::kernel_version().unwrap_or_else(unknown),
        System::host_name().unwrap_or_else(unknown),
    )
}

/// What [`SessionController::reconcile`] changed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reconciled {
    /// Stored current id that pointed at no open session.
    pub cleared_current: Option<String>,
    /// Open rows that were not current, now marked interrupted.
    pub interrupted: Vec<String>,
}

#[derive(Clone)]
pub struct SessionController {
    db: Database,
    settings: Arc<SettingsStore>,
}

impl SessionController {
    pub fn new(db: Database, settings: Arc<SettingsStore>) -> Self {
        Self { db, settings }
    }

    pub async fn current_session(&self) -> anyhow::Result<Option<Session>> {
        match self.settings.current_session_id() {
            Some(id) => self.db.get_session(&id).await,
            None => Ok(None),
        }
    }

    pub async fn open_session(&self, name: &str) -> Result<Session, SessionError> {
        let name = validate_name(name)?;
        if let Some(current) = self.settings.current_session_id() {
            return Err(SessionError::AlreadyOpen(current));
        }
        if self.db.session_name_exists(name).await? {
            return Err(SessionError::Duplicate(name.to_string()));
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            user_name: self.settings.preferences().user_name,
            device_info: device_info(),
            started_at: Utc::now(),
            finished_at: None,
            status: SessionStatus::Open,
            marks_count: 0,
            records_count: 0,
        };
        self.db.insert_session(&session).await?;

        let id = session.id.clone();
        self.settings.update(|prefs| {
            prefs.current_session_id = Some(id);
            prefs.marks_count = 0;
            prefs.records_count = 0;
        })?;

        info!("Opened session {} ({})", session.name, session.id);
        Ok(session)
    }

    pub async fn close_session(&self) -> Result<Session, SessionError> {
        let id = self
            .settings
            .current_session_id()
            .ok_or(SessionError::NoneOpen)?;
        let prefs = self.settings.preferences();

        self.db
            .update_session_counters(&id, prefs.marks_count, prefs.records_count)
            .await?;
        if !self
            .db
            .finish_session(&id, SessionStatus::Closed, Utc::now())
            .await?
        {
            warn!("Session {id} was no longer open when closing");
        }
        self.clear_current()?;

        let session = self
            .db
            .get_session(&id)
            .await?
            .ok_or_else(|| anyhow!("session {id} disappeared while closing"))?;
        info!(
            "Closed session {} with {} marks and {} records",
            session.name, session.marks_count, session.records_count
        );
        Ok(session)
    }

    /// Startup pass: drops a current id that points at no open session and
    /// marks other open sessions interrupted.
    pub async fn reconcile(&self) -> anyhow::Result<Reconciled> {
        let mut report = Reconciled::default();
        let current = self.settings.current_session_id();

        if let Some(id) = &current {
            let still_open = matches!(
                self.db.get_session(id).await?,
                Some(Session {
                    status: SessionStatus::Open,
                    ..
                })
            );
            if !still_open {
                warn!("Current session {id} is not open; clearing it");
                self.clear_current()?;
                report.cleared_current = Some(id.clone());
            }
        }

        let keep = if report.cleared_current.is_some() {
            None
        } else {
            current
        };
        for session in self.db.get_sessions_with_status(SessionStatus::Open).await? {
            if keep.as_deref() == Some(session.id.as_str()) {
                continue;
            }
            self.db
                .finish_session(&session.id, SessionStatus::Interrupted, Utc::now())
                .await?;
            info!("Recovered orphaned session {}; marked Interrupted", session.id);
            report.interrupted.push(session.id);
        }

        Ok(report)
    }

    fn clear_current(&self) -> anyhow::Result<()> {
        self.settings.update(|prefs| {
            prefs.current_session_id = None;
            prefs.marks_count = 0;
            prefs.records_count = 0;
        })
    }
}
