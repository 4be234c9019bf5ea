use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::engine::{EngineKind, Engines};
use crate::settings::SettingsStore;

use super::loop_worker::{logging_loop, LoopContext};
use super::status::{StatusBroadcaster, StatusCode};
use super::wake_lock::WakeLock;

/// Background logging for the open session. Owns the engines while running;
/// everyone else gets references through [`bind`](Self::bind).
pub struct LoggingService {
    db: Database,
    settings: Arc<SettingsStore>,
    engines: Engines,
    status: Arc<StatusBroadcaster>,
    wake_lock: Arc<dyn WakeLock>,
    storage_dir: PathBuf,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    started: Vec<EngineKind>,
    session_id: Option<String>,
}

impl LoggingService {
    pub fn new(
        db: Database,
        settings: Arc<SettingsStore>,
        engines: Engines,
        status: Arc<StatusBroadcaster>,
        wake_lock: Arc<dyn WakeLock>,
        storage_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            settings,
            engines,
            status,
            wake_lock,
            storage_dir,
            handle: None,
            cancel_token: None,
            started: Vec::new(),
            session_id: None,
        }
    }

    pub fn bind(&self) -> Engines {
        self.engines.clone()
    }

    pub fn status(&self) -> Arc<StatusBroadcaster> {
        Arc::clone(&self.status)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Engines that this run started, in start order.
    pub fn started_engines(&self) -> &[EngineKind] {
        &self.started
    }

    pub async fn start(&mut self, session_id: String) -> Result<()> {
        if self.handle.is_some() {
            bail!("logging already active");
        }

        self.started = self.start_engines();

        let cancel_token = CancellationToken::new();
        let ctx = LoopContext {
            session_id: session_id.clone(),
            db: self.db.clone(),
            settings: Arc::clone(&self.settings),
            engines: self.engines.clone(),
            status: Arc::clone(&self.status),
            wake_lock: Arc::clone(&self.wake_lock),
            storage_dir: self.storage_dir.clone(),
        };

        self.status
            .publish(StatusCode::Started, self.settings.preferences().records_count);
        let handle = tokio::spawn(logging_loop(ctx, cancel_token.clone()));

        info!("Logging service started for session {session_id}");
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.session_id = Some(session_id);
        Ok(())
    }

    fn start_engines(&self) -> Vec<EngineKind> {
        let mut started = Vec::new();
        for kind in self.engines.enabled() {
            let result = match kind {
                EngineKind::Sensor => self.engines.sensor.start_with_report().map(|missing| {
                    if !missing.is_empty() {
                        warn!("Logging without: {}", missing.join(", "));
                    }
                }),
                _ => self.engines.get(kind).start(),
            };
            match result {
                Ok(()) => started.push(kind),
                Err(err) => error!("Failed to start {} engine: {err:#}", kind.as_str()),
            }
        }
        started
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let joined = handle
            .await
            .context("logging loop task failed to join");

        // Engine shutdown joins worker threads.
        let engines = self.engines.clone();
        let kinds = std::mem::take(&mut self.started);
        tokio::task::spawn_blocking(move || {
            for kind in kinds.into_iter().rev() {
                engines.get(kind).stop();
            }
        })
        .await
        .context("engine shutdown task failed")?;

        self.wake_lock.release();
        self.status
            .publish(StatusCode::Finished, self.settings.preferences().records_count);
        if let Some(session_id) = self.session_id.take() {
            info!("Logging service stopped for session {session_id}");
        }
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::engine::Engine;
    use crate::service::testing::Harness;
    use crate::service::wake_lock::NoopWakeLock;

    fn service(harness: &Harness, wake_lock: Arc<NoopWakeLock>) -> LoggingService {
        LoggingService::new(
            harness.db.clone(),
            Arc::clone(&harness.settings),
            harness.engines.clone(),
            Arc::new(StatusBroadcaster::new()),
            wake_lock,
            harness.dir.path().join("records"),
        )
    }

    #[tokio::test]
    async fn run_records_then_finishes() {
        let harness = Harness::with_open_session().await;
        let wake_lock = Arc::new(NoopWakeLock::default());
        let mut service = service(&harness, Arc::clone(&wake_lock));
        let mut status = service.status().subscribe();

        service.start(harness.session_id.clone()).await.unwrap();
        assert!(service.is_running());
        assert!(service.start("other".into()).await.is_err());
        assert_eq!(status.recv().await.unwrap().code, StatusCode::Started);
        assert_eq!(status.recv().await.unwrap().code, StatusCode::Running);

        service.stop().await.unwrap();
        assert!(!service.is_running());
        assert!(!wake_lock.is_held());
        assert_eq!(service.status().last().unwrap().code, StatusCode::Finished);

        let marks = harness
            .db
            .get_marks_for_session(&harness.session_id)
            .await
            .unwrap();
        assert!(!marks.is_empty());
        assert!(marks.iter().all(|mark| mark.automatic));
    }

    #[tokio::test]
    async fn missing_hardware_is_switched_off_for_the_run() {
        let harness = Harness::with_open_session().await;
        let mut service = service(&harness, Arc::new(NoopWakeLock::default()));

        service.start(harness.session_id.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.stop().await.unwrap();

        let prefs = harness.settings.preferences();
        assert!(!prefs.sensors.any());
        assert!(!prefs.gps_enabled);
        assert!(!harness.engines.sensor.is_enabled());
    }

    #[tokio::test]
    async fn bind_shares_the_running_engines() {
        let harness = Harness::with_open_session().await;
        let service = service(&harness, Arc::new(NoopWakeLock::default()));
        let bound = service.bind();
        assert!(Arc::ptr_eq(&bound.cell, &harness.engines.cell));
        assert_eq!(bound.cell.data().len(), 1);
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let harness = Harness::with_open_session().await;
        let mut service = service(&harness, Arc::new(NoopWakeLock::default()));
        service.stop().await.unwrap();
        assert!(service.status().last().is_none());
    }
}
