//! Manual marks placed by the user.

use std::sync::Arc;

use chrono::{Duration, Utc};
use log::info;
use thiserror::Error;

use crate::db::{models::Mark, Database};
use crate::engine::Engines;
use crate::service::recorder::{record, retract, MarkDraft, Recorded, Snapshot};
use crate::settings::SettingsStore;

/// A second mark this soon after the previous one is treated as a repeat,
/// and a mark can only be undone within the same window.
pub const REPEAT_WINDOW_SECS: i64 = 4;

#[derive(Debug, Error)]
pub enum MarkError {
    #[error("no session is open")]
    NoSession,
    #[error("there is no mark to undo")]
    NothingToUndo,
    #[error("the last mark is {elapsed_ms} ms old and can no longer be undone")]
    UndoWindowElapsed { elapsed_ms: i64 },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    Recorded(Recorded),
    /// Came too soon after the carried mark; nothing was written.
    Duplicate(Mark),
}

pub struct MarkRecorder {
    db: Database,
    settings: Arc<SettingsStore>,
    engines: Engines,
}

impl MarkRecorder {
    pub fn new(db: Database, settings: Arc<SettingsStore>, engines: Engines) -> Self {
        Self {
            db,
            settings,
            engines,
        }
    }

    fn window() -> Duration {
        Duration::seconds(REPEAT_WINDOW_SECS)
    }

    pub async fn mark(&self, draft: MarkDraft) -> Result<MarkOutcome, MarkError> {
        let session_id = self
            .settings
            .current_session_id()
            .ok_or(MarkError::NoSession)?;

        if let Some(previous) = self.db.get_latest_manual_mark(&session_id).await? {
            if Utc::now() - previous.timestamp < Self::window() {
                info!("Ignoring repeated mark; previous {} is recent", previous.id);
                return Ok(MarkOutcome::Duplicate(previous));
            }
        }

        let snapshot = Snapshot::capture(&self.engines);
        let draft = MarkDraft {
            automatic: false,
            ..draft
        };
        let recorded = record(&self.db, &self.settings, &session_id, snapshot, draft).await?;
        info!(
            "Mark {} stored with {} records",
            recorded.mark.id, recorded.records
        );
        Ok(MarkOutcome::Recorded(recorded))
    }

    /// Deletes the latest manual mark and its rows if it is recent enough.
    pub async fn undo_last(&self) -> Result<Mark, MarkError> {
        let session_id = self
            .settings
            .current_session_id()
            .ok_or(MarkError::NoSession)?;
        let previous = self
            .db
            .get_latest_manual_mark(&session_id)
            .await?
            .ok_or(MarkError::NothingToUndo)?;

        let elapsed = Utc::now() - previous.timestamp;
        if elapsed >= Self::window() {
            return Err(MarkError::UndoWindowElapsed {
                elapsed_ms: elapsed.num_milliseconds(),
            });
        }

        if !retract(&self.db, &self.settings, &session_id, &previous.id).await? {
            return Err(MarkError::NothingToUndo);
        }
        info!("Undid mark {}", previous.id);
        Ok(previous)
    }
}
