use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u64},
    models::{Session, SessionStatus},
};

const SESSION_COLUMNS: &str = "id, name, user_name, device_info, started_at, finished_at, status, marks_count, records_count";

fn row_to_session(row: &Row) -> Result<Session> {
    let started_at: String = row.get("started_at")?;
    let finished_at: Option<String> = row.get("finished_at")?;
    let status: String = row.get("status")?;
    let marks_count: i64 = row.get("marks_count")?;
    let records_count: i64 = row.get("records_count")?;

    Ok(Session {
        id: row.get("id")?,
        name: row.get("name")?,
        user_name: row.get("user_name")?,
        device_info: row.get("device_info")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        finished_at: parse_optional_datetime(finished_at, "finished_at")?,
        status: parse_status(&status)?,
        marks_count: to_u64(marks_count, "marks_count")?,
        records_count: to_u64(records_count, "records_count")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, name, user_name, device_info, started_at, finished_at, status, marks_count, records_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    record.name,
                    record.user_name,
                    record.device_info,
                    record.started_at.to_rfc3339(),
                    record.finished_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    to_i64(record.marks_count)?,
                    to_i64(record.records_count)?,
                ],
            )
            .context("failed to insert session")?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))?;
            let row = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?;
            row.transpose()
        })
        .await
    }

    pub async fn session_name_exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.execute(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE name = ?1)",
                params![name],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at DESC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn get_sessions_with_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = ?1 ORDER BY started_at"
            ))?;
            let mut rows = stmt.query(params![status.as_str()])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn update_session_counters(
        &self,
        session_id: &str,
        marks_count: u64,
        records_count: u64,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions SET marks_count = ?1, records_count = ?2 WHERE id = ?3",
                params![to_i64(marks_count)?, to_i64(records_count)?, session_id],
            )
            .context("failed to update session counters")?;
            Ok(())
        })
        .await
    }

    /// Moves a session out of `Open`, stamping its finish time.
    pub async fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<bool> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions
                     SET status = ?1,
                         finished_at = ?2
                     WHERE id = ?3 AND status = 'Open'",
                    params![status.as_str(), finished_at.to_rfc3339(), session_id],
                )
                .context("failed to finish session")?;
            Ok(changed > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, name: &str) -> Session {
        Session {
            id: id.into(),
            name: name.into(),
            user_name: "User1".into(),
            device_info: "test device".into(),
            started_at: Utc::now(),
            finished_at: None,
            status: SessionStatus::Open,
            marks_count: 0,
            records_count: 0,
        }
    }

    fn open_db(dir: &tempfile::TempDir) -> Database {
        Database::new(dir.path().join("fieldlogger.db")).unwrap()
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let record = session("s1", "morning-drive");
        db.insert_session(&record).await.unwrap();

        let stored = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(stored.name, "morning-drive");
        assert_eq!(stored.status, SessionStatus::Open);
        assert!(db.session_name_exists("morning-drive").await.unwrap());
        assert!(!db.session_name_exists("evening").await.unwrap());
        assert!(db.get_session("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.insert_session(&session("s1", "route")).await.unwrap();
        assert!(db.insert_session(&session("s2", "route")).await.is_err());
    }

    #[tokio::test]
    async fn finishing_only_touches_open_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.insert_session(&session("s1", "route")).await.unwrap();
        db.update_session_counters("s1", 3, 12).await.unwrap();

        assert!(db
            .finish_session("s1", SessionStatus::Closed, Utc::now())
            .await
            .unwrap());
        assert!(!db
            .finish_session("s1", SessionStatus::Interrupted, Utc::now())
            .await
            .unwrap());

        let stored = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Closed);
        assert_eq!((stored.marks_count, stored.records_count), (3, 12));
        assert!(stored.finished_at.is_some());
        assert!(db
            .get_sessions_with_status(SessionStatus::Open)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(db.list_sessions().await.unwrap().len(), 1);
    }
}
