use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use crate::db::{
    connection::Database,
    helpers::parse_datetime,
    models::{Mark, MarkCategory, ObservationSet},
    repositories::observations::insert_observation_set,
};
use crate::engine::sensor::GeoPoint;

const MARK_COLUMNS: &str =
    "id, session_id, category_id, category_text, label, timestamp, latitude, longitude, automatic";

fn row_to_mark(row: &Row) -> Result<Mark> {
    let timestamp: String = row.get("timestamp")?;
    let latitude: Option<f64> = row.get("latitude")?;
    let longitude: Option<f64> = row.get("longitude")?;
    let point = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint {
            latitude,
            longitude,
        }),
        _ => None,
    };

    Ok(Mark {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        category: MarkCategory::from_columns(row.get("category_id")?, row.get("category_text")?),
        label: row.get("label")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        point,
        automatic: row.get("automatic")?,
    })
}

fn insert_mark(tx: &Transaction<'_>, mark: &Mark) -> Result<()> {
    let (category_id, category_text) = MarkCategory::to_columns(mark.category.as_ref());
    tx.execute(
        "INSERT INTO marks (id, session_id, category_id, category_text, label, timestamp, latitude, longitude, automatic)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            mark.id,
            mark.session_id,
            category_id,
            category_text,
            mark.label,
            mark.timestamp.to_rfc3339(),
            mark.point.map(|point| point.latitude),
            mark.point.map(|point| point.longitude),
            mark.automatic,
        ],
    )
    .context("failed to insert mark")?;
    Ok(())
}

impl Database {
    /// Writes a mark and all of its observations in one transaction.
    /// Returns the number of observation rows written.
    pub async fn insert_mark_with_observations(
        &self,
        mark: &Mark,
        observations: Vec<ObservationSet>,
    ) -> Result<u64> {
        let record = mark.clone();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open mark transaction")?;
            insert_mark(&tx, &record)?;
            let mut written = 0u64;
            for set in &observations {
                written += insert_observation_set(&tx, &record.id, set)?;
            }
            tx.commit().context("failed to commit mark")?;
            Ok(written)
        })
        .await
    }

    /// Deletes a mark; its observations go with it through the cascade.
    /// Returns the number of observation rows removed.
    pub async fn delete_mark(&self, mark_id: &str) -> Result<Option<u64>> {
        let mark_id = mark_id.to_string();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open delete transaction")?;
            let mut removed = 0u64;
            for table in ["cell_observations", "sensor_observations", "external_observations"] {
                let count: i64 = tx.query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE mark_id = ?1"),
                    params![mark_id],
                    |row| row.get(0),
                )?;
                removed += u64::try_from(count).unwrap_or(0);
            }
            let deleted = tx
                .execute("DELETE FROM marks WHERE id = ?1", params![mark_id])
                .context("failed to delete mark")?;
            tx.commit().context("failed to commit mark deletion")?;
            Ok((deleted > 0).then_some(removed))
        })
        .await
    }

    pub async fn get_marks_for_session(&self, session_id: &str) -> Result<Vec<Mark>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MARK_COLUMNS} FROM marks WHERE session_id = ?1 ORDER BY timestamp, rowid"
            ))?;
            let mut rows = stmt.query(params![session_id])?;
            let mut marks = Vec::new();
            while let Some(row) = rows.next()? {
                marks.push(row_to_mark(row)?);
            }
            Ok(marks)
        })
        .await
    }

    /// Most recent mark the user placed by hand.
    pub async fn get_latest_manual_mark(&self, session_id: &str) -> Result<Option<Mark>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MARK_COLUMNS} FROM marks WHERE session_id = ?1 AND automatic = 0
                 ORDER BY timestamp DESC, rowid DESC LIMIT 1"
            ))?;
            let row = stmt
                .query_row(params![session_id], |row| Ok(row_to_mark(row)))
                .optional()?;
            row.transpose()
        })
        .await
    }
}
