use anyhow::{bail, Context, Result};
use rusqlite::{params, Row, Transaction};

use crate::db::{
    connection::Database,
    models::{CellRecord, ObservationSet, ReadingRecord},
};
use crate::engine::{cell::CellTowerObservation, EngineKind, Reading};

fn reading_table(kind: EngineKind) -> Result<&'static str> {
    match kind {
        EngineKind::Sensor => Ok("sensor_observations"),
        EngineKind::External => Ok("external_observations"),
        EngineKind::Cell => bail!("cell observations are not stored as readings"),
    }
}

fn insert_cell(tx: &Transaction<'_>, mark_id: &str, cell: &CellTowerObservation) -> Result<()> {
    tx.execute(
        "INSERT INTO cell_observations (mark_id, generation, network_type, active, mcc, mnc, lac, cid, psc, power_dbm)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            mark_id,
            cell.generation.as_str(),
            cell.network_type.as_str(),
            cell.active,
            cell.mcc,
            cell.mnc,
            cell.lac,
            cell.cid,
            cell.psc,
            cell.power_dbm,
        ],
    )
    .context("failed to insert cell observation")?;
    Ok(())
}

fn insert_reading(tx: &Transaction<'_>, table: &str, mark_id: &str, reading: &Reading) -> Result<()> {
    let values = serde_json::to_string(&reading.to_json())
        .context("failed to serialize reading values")?;
    tx.execute(
        &format!(
            "INSERT INTO {table} (mark_id, title, description, values_json) VALUES (?1, ?2, ?3, ?4)"
        ),
        params![mark_id, reading.title, reading.description, values],
    )
    .with_context(|| format!("failed to insert into {table}"))?;
    Ok(())
}

/// Writes one engine's rows for a mark inside the caller's transaction.
pub(crate) fn insert_observation_set(
    tx: &Transaction<'_>,
    mark_id: &str,
    set: &ObservationSet,
) -> Result<u64> {
    match set {
        ObservationSet::Cell(cells) => {
            for cell in cells {
                insert_cell(tx, mark_id, cell)?;
            }
        }
        ObservationSet::Sensor(readings) | ObservationSet::External(readings) => {
            let table = reading_table(set.kind())?;
            for reading in readings {
                insert_reading(tx, table, mark_id, reading)?;
            }
        }
    }
    Ok(set.len() as u64)
}

fn row_to_cell(row: &Row) -> Result<CellRecord> {
    Ok(CellRecord {
        id: row.get("id")?,
        mark_id: row.get("mark_id")?,
        generation: row.get("generation")?,
        network_type: row.get("network_type")?,
        active: row.get("active")?,
        mcc: row.get("mcc")?,
        mnc: row.get("mnc")?,
        lac: row.get("lac")?,
        cid: row.get("cid")?,
        psc: row.get("psc")?,
        power_dbm: row.get("power_dbm")?,
    })
}

fn row_to_reading(row: &Row) -> Result<ReadingRecord> {
    let values: String = row.get("values_json")?;
    Ok(ReadingRecord {
        id: row.get("id")?,
        mark_id: row.get("mark_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        values: serde_json::from_str(&values).context("failed to parse stored reading")?,
    })
}

impl Database {
    /// Cell rows of a mark, serving cell first.
    pub async fn get_cell_observations(&self, mark_id: &str) -> Result<Vec<CellRecord>> {
        let mark_id = mark_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, mark_id, generation, network_type, active, mcc, mnc, lac, cid, psc, power_dbm
                 FROM cell_observations
                 WHERE mark_id = ?1
                 ORDER BY id",
            )?;
            let mut rows = stmt.query(params![mark_id])?;
            let mut cells = Vec::new();
            while let Some(row) = rows.next()? {
                cells.push(row_to_cell(row)?);
            }
            Ok(cells)
        })
        .await
    }

    pub async fn get_readings(&self, mark_id: &str, kind: EngineKind) -> Result<Vec<ReadingRecord>> {
        let mark_id = mark_id.to_string();
        let table = reading_table(kind)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, mark_id, title, description, values_json FROM {table}
                 WHERE mark_id = ?1 ORDER BY id"
            ))?;
            let mut rows = stmt.query(params![mark_id])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_reading(row)?);
            }
            Ok(readings)
        })
        .await
    }
}
