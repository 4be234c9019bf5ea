pub mod controller;
pub mod loop_worker;
pub mod recorder;
pub mod status;
pub mod wake_lock;

pub use controller::LoggingService;
pub use recorder::{MarkDraft, Recorded, Snapshot};
pub use status::{ServiceStatus, StatusBroadcaster, StatusCode};
pub use wake_lock::{NoopWakeLock, WakeLock};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::Utc;

    use crate::db::{
        models::{Session, SessionStatus},
        Database,
    };
    use crate::engine::{
        cell::source::NoTelephony, external::SerialConnector, sensor::source::NoSensors,
        CellEngine, Engines, ExternalDeviceEngine, SensorEngine,
    };
    use crate::settings::SettingsStore;

    /// Store, settings and hardware-less engines in a temp directory.
    pub(crate) struct Harness {
        pub dir: tempfile::TempDir,
        pub db: Database,
        pub settings: Arc<SettingsStore>,
        pub engines: Engines,
        pub session_id: String,
    }

    impl Harness {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Database::new(dir.path().join("fieldlogger.db")).unwrap();
            let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")).unwrap());
            let engines = Engines {
                cell: Arc::new(CellEngine::new(Arc::new(NoTelephony), Arc::clone(&settings))),
                sensor: Arc::new(SensorEngine::new(
                    Arc::new(NoSensors),
                    Arc::new(NoSensors),
                    Arc::new(NoSensors),
                    Arc::clone(&settings),
                )),
                external: Arc::new(ExternalDeviceEngine::new(
                    Arc::new(SerialConnector::default()),
                    Arc::clone(&settings),
                )),
            };
            Self {
                dir,
                db,
                settings,
                engines,
                session_id: String::new(),
            }
        }

        pub async fn with_open_session() -> Self {
            let mut harness = Self::new();
            harness.session_id = "session-1".into();
            harness
                .db
                .insert_session(&Session {
                    id: harness.session_id.clone(),
                    name: "route".into(),
                    user_name: "User1".into(),
                    device_info: "test device".into(),
                    started_at: Utc::now(),
                    finished_at: None,
                    status: SessionStatus::Open,
                    marks_count: 0,
                    records_count: 0,
                })
                .await
                .unwrap();
            let id = harness.session_id.clone();
            harness
                .settings
                .update(|prefs| prefs.current_session_id = Some(id))
                .unwrap();
            harness
        }
    }
}
