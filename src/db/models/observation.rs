use serde::{Deserialize, Serialize};

use crate::engine::{cell::CellTowerObservation, EngineKind, Reading};

/// Everything one engine contributed to a mark.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationSet {
    Cell(Vec<CellTowerObservation>),
    Sensor(Vec<Reading>),
    External(Vec<Reading>),
}

impl ObservationSet {
    pub fn kind(&self) -> EngineKind {
        match self {
            ObservationSet::Cell(_) => EngineKind::Cell,
            ObservationSet::Sensor(_) => EngineKind::Sensor,
            ObservationSet::External(_) => EngineKind::External,
        }
    }

    /// Number of rows this set writes.
    pub fn len(&self) -> usize {
        match self {
            ObservationSet::Cell(rows) => rows.len(),
            ObservationSet::Sensor(rows) | ObservationSet::External(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellRecord {
    pub id: i64,
    pub mark_id: String,
    pub generation: String,
    pub network_type: String,
    pub active: bool,
    pub mcc: Option<i32>,
    pub mnc: Option<i32>,
    pub lac: Option<i32>,
    pub cid: Option<i32>,
    pub psc: Option<i32>,
    pub power_dbm: i32,
}

/// A stored sensor or external reading; `values` maps column key to value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRecord {
    pub id: i64,
    pub mark_id: String,
    pub title: String,
    pub description: Option<String>,
    pub values: serde_json::Value,
}
