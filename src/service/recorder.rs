//! Snapshot → mark path shared by the logging loop and manual marks.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{
    models::{Mark, MarkCategory, ObservationSet},
    Database,
};
use crate::engine::{sensor::GeoPoint, Engine, Engines};
use crate::settings::SettingsStore;

/// Engine state frozen at one instant.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub point: Option<GeoPoint>,
    pub observations: Vec<ObservationSet>,
}

impl Snapshot {
    pub fn capture(engines: &Engines) -> Self {
        let mut observations = Vec::new();
        if engines.cell.is_enabled() {
            observations.push(ObservationSet::Cell(engines.cell.observations()));
        }
        if engines.sensor.is_enabled() {
            let readings = engines.sensor.data();
            if !readings.is_empty() {
                observations.push(ObservationSet::Sensor(readings));
            }
        }
        if engines.external.is_enabled() {
            let readings = engines.external.data();
            if !readings.is_empty() {
                observations.push(ObservationSet::External(readings));
            }
        }

        Self {
            timestamp: Utc::now(),
            point: engines.sensor.gps().point(),
            observations,
        }
    }

    pub fn record_count(&self) -> u64 {
        self.observations.iter().map(|set| set.len() as u64).sum()
    }
}

/// What the caller knows about a mark before it is stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkDraft {
    pub category: Option<MarkCategory>,
    pub label: Option<String>,
    pub automatic: bool,
}

impl MarkDraft {
    pub fn automatic() -> Self {
        Self {
            automatic: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub mark: Mark,
    /// Observation rows written with this mark.
    pub records: u64,
    pub marks_total: u64,
    pub records_total: u64,
}

/// Persists `snapshot` as one mark of `session_id` and advances the
/// session counters.
pub async fn record(
    db: &Database,
    settings: &SettingsStore,
    session_id: &str,
    snapshot: Snapshot,
    draft: MarkDraft,
) -> Result<Recorded> {
    let mark = Mark {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        category: draft.category,
        label: draft.label,
        timestamp: snapshot.timestamp,
        point: snapshot.point,
        automatic: draft.automatic,
    };

    let records = db
        .insert_mark_with_observations(&mark, snapshot.observations)
        .await
        .with_context(|| format!("failed to record mark for session {session_id}"))?;
    let (marks_total, records_total) = settings.bump_counters(1, records)?;
    db.update_session_counters(session_id, marks_total, records_total)
        .await?;

    Ok(Recorded {
        mark,
        records,
        marks_total,
        records_total,
    })
}

/// Removes a stored mark and takes it back out of the counters. `false` when
/// the mark no longer exists.
pub async fn retract(
    db: &Database,
    settings: &SettingsStore,
    session_id: &str,
    mark_id: &str,
) -> Result<bool> {
    let Some(records) = db.delete_mark(mark_id).await? else {
        return Ok(false);
    };
    let (marks_total, records_total) = settings.retract_counters(1, records)?;
    db.update_session_counters(session_id, marks_total, records_total)
        .await?;
    Ok(true)
}
