pub mod args;
pub mod db;
pub mod engine;
pub mod service;
pub mod session;
pub mod settings;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::Mutex;

use db::Database;
use engine::{
    cell::source::NoTelephony,
    external::{DeviceConnector, SerialConnector},
    sensor::source::{LocationSource, MicrophoneSource, NoSensors, SensorHub},
    cell::TelephonySource,
    CellEngine, Engines, ExternalDeviceEngine, SensorEngine,
};
use service::{LoggingService, NoopWakeLock, StatusBroadcaster, WakeLock};
use session::{MarkRecorder, SessionController};
use settings::SettingsStore;

pub const DATABASE_FILE: &str = "fieldlogger.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";
pub const RECORDS_DIR: &str = "records";

/// Platform bindings the engines read from.
pub struct Hardware {
    pub telephony: Arc<dyn TelephonySource>,
    pub sensors: Arc<dyn SensorHub>,
    pub location: Arc<dyn LocationSource>,
    pub microphone: Arc<dyn MicrophoneSource>,
    pub connector: Arc<dyn DeviceConnector>,
    pub wake_lock: Arc<dyn WakeLock>,
}

impl Hardware {
    /// No radio or sensors; the external device is reached over a serial port.
    pub fn headless(connector: SerialConnector) -> Self {
        Self {
            telephony: Arc::new(NoTelephony),
            sensors: Arc::new(NoSensors),
            location: Arc::new(NoSensors),
            microphone: Arc::new(NoSensors),
            connector: Arc::new(connector),
            wake_lock: Arc::new(NoopWakeLock::default()),
        }
    }
}

/// Everything the process shares: one store, one settings file, one set of
/// engines. Components get what they need from here instead of globals.
pub struct AppContext {
    pub data_dir: PathBuf,
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub engines: Engines,
    pub sessions: SessionController,
    pub marks: MarkRecorder,
    pub service: Mutex<LoggingService>,
}

impl AppContext {
    pub async fn open(data_dir: &Path, hardware: Hardware) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let db = Database::new(data_dir.join(DATABASE_FILE))?;
        let settings = Arc::new(SettingsStore::new(data_dir.join(SETTINGS_FILE))?);

        let engines = Engines {
            cell: Arc::new(CellEngine::new(hardware.telephony, Arc::clone(&settings))),
            sensor: Arc::new(SensorEngine::new(
                hardware.sensors,
                hardware.location,
                hardware.microphone,
                Arc::clone(&settings),
            )),
            external: Arc::new(ExternalDeviceEngine::new(
                hardware.connector,
                Arc::clone(&settings),
            )),
        };

        let sessions = SessionController::new(db.clone(), Arc::clone(&settings));
        let report = sessions.reconcile().await?;
        if let Some(id) = &report.cleared_current {
            warn!("Cleared stale current session {id}");
        }
        if !report.interrupted.is_empty() {
            warn!("Marked {} sessions interrupted", report.interrupted.len());
        }

        let marks = MarkRecorder::new(db.clone(), Arc::clone(&settings), engines.clone());
        let service = LoggingService::new(
            db.clone(),
            Arc::clone(&settings),
            engines.clone(),
            Arc::new(StatusBroadcaster::new()),
            hardware.wake_lock,
            data_dir.join(RECORDS_DIR),
        );

        info!("fieldlogger ready in {}", data_dir.display());
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            db,
            settings,
            engines,
            sessions,
            marks,
            service: Mutex::new(service),
        })
    }
}

/// Logs at `Info`; per-module `RUST_LOG` directives still apply.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
