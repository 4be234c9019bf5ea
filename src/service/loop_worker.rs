use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::engine::Engines;
use crate::settings::SettingsStore;

use super::recorder::{record, MarkDraft, Recorded, Snapshot};
use super::status::{StatusBroadcaster, StatusCode};
use super::wake_lock::WakeLock;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "fieldlogger::service";

use crate::{log_error, log_info, log_warn};

const TICK_TIMEOUT_SECS: u64 = 10;

/// Everything one logging run needs, owned by the loop task.
pub struct LoopContext {
    pub session_id: String,
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub engines: Engines,
    pub status: Arc<StatusBroadcaster>,
    pub wake_lock: Arc<dyn WakeLock>,
    pub storage_dir: PathBuf,
}

/// Tick source that follows the configured interval. A changed interval
/// takes effect one full new period after the tick that noticed it.
pub(crate) struct Cadence {
    period_secs: u64,
    ticker: Interval,
}

impl Cadence {
    pub(crate) fn new(period_secs: u64) -> Self {
        Self {
            period_secs,
            ticker: ticker(period_secs, true),
        }
    }

    pub(crate) fn period_secs(&self) -> u64 {
        self.period_secs
    }

    pub(crate) async fn tick(&mut self) {
        self.ticker.tick().await;
    }

    /// Rebuilds the ticker when the setting moved. Returns the old period
    /// if it did.
    pub(crate) fn follow(&mut self, settings: &SettingsStore) -> Option<u64> {
        let configured = settings.interval_secs();
        if configured == self.period_secs {
            return None;
        }
        let previous = std::mem::replace(&mut self.period_secs, configured);
        self.ticker = ticker(configured, false);
        Some(previous)
    }
}

fn ticker(period_secs: u64, fire_now: bool) -> Interval {
    let period = Duration::from_secs(period_secs);
    let start = if fire_now {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub async fn logging_loop(ctx: LoopContext, cancel_token: CancellationToken) {
    let mut cadence = Cadence::new(ctx.settings.interval_secs());
    log_info!(
        target: LOG_TARGET,
        "Logging session {} every {}s",
        ctx.session_id,
        cadence.period_secs()
    );

    loop {
        tokio::select! {
            _ = cadence.tick() => {
                match time::timeout(Duration::from_secs(TICK_TIMEOUT_SECS), tick(&ctx)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => {
                        log_error!(target: LOG_TARGET, "Logging tick failed for session {}: {err:#}", ctx.session_id);
                        ctx.status.error(ctx.settings.preferences().records_count, format!("{err:#}"));
                    }
                    Err(_) => log_warn!(target: LOG_TARGET, "Logging tick took longer than {}s", TICK_TIMEOUT_SECS),
                }

                if let Some(previous) = cadence.follow(&ctx.settings) {
                    log_info!(target: LOG_TARGET, "Logging interval changed {}s -> {}s", previous, cadence.period_secs());
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!(target: LOG_TARGET, "Logging loop shutting down");
                break;
            }
        }
    }
}

/// One logging step. `Ok(None)` when storage is unavailable; the loop keeps
/// going and the next tick tries again.
pub async fn tick(ctx: &LoopContext) -> Result<Option<Recorded>> {
    ctx.wake_lock.acquire();

    if let Err(err) = tokio::fs::create_dir_all(&ctx.storage_dir).await {
        log_error!(
            target: LOG_TARGET,
            "Storage directory {} unavailable: {err}",
            ctx.storage_dir.display()
        );
        ctx.status.error(
            ctx.settings.preferences().records_count,
            format!("storage unavailable: {err}"),
        );
        return Ok(None);
    }

    let snapshot = Snapshot::capture(&ctx.engines);
    let recorded = record(
        &ctx.db,
        &ctx.settings,
        &ctx.session_id,
        snapshot,
        MarkDraft::automatic(),
    )
    .await?;
    ctx.status
        .publish(StatusCode::Running, recorded.records_total);
    Ok(Some(recorded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;
    use crate::service::testing::Harness;
    use crate::service::wake_lock::NoopWakeLock;

    fn context(harness: &Harness, storage_dir: PathBuf) -> LoopContext {
        LoopContext {
            session_id: harness.session_id.clone(),
            db: harness.db.clone(),
            settings: Arc::clone(&harness.settings),
            engines: harness.engines.clone(),
            status: Arc::new(StatusBroadcaster::new()),
            wake_lock: Arc::new(NoopWakeLock::default()),
            storage_dir,
        }
    }

    #[tokio::test]
    async fn tick_writes_an_automatic_mark() {
        let harness = Harness::with_open_session().await;
        let ctx = context(&harness, harness.dir.path().join("records"));
        let mut status = ctx.status.subscribe();

        let recorded = tick(&ctx).await.unwrap().unwrap();
        assert!(recorded.mark.automatic);
        assert_eq!(recorded.mark.point, None);
        // Without telephony the cell engine still reports its placeholder row.
        assert_eq!(recorded.records, 1);
        assert_eq!((recorded.marks_total, recorded.records_total), (1, 1));
        assert!(ctx.wake_lock.is_held());
        assert!(ctx.storage_dir.is_dir());

        let update = status.try_recv().unwrap();
        assert_eq!(update.code, StatusCode::Running);
        assert_eq!(update.records, 1);

        let cells = harness
            .db
            .get_cell_observations(&recorded.mark.id)
            .await
            .unwrap();
        assert_eq!(cells.len(), 1);
        assert!(cells[0].active);
        assert!(harness
            .db
            .get_readings(&recorded.mark.id, EngineKind::Sensor)
            .await
            .unwrap()
            .is_empty());

        let session = harness
            .db
            .get_session(&harness.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((session.marks_count, session.records_count), (1, 1));
    }

    #[tokio::test]
    async fn unusable_storage_reports_error_and_writes_nothing() {
        let harness = Harness::with_open_session().await;
        let blocker = harness.dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let ctx = context(&harness, blocker.join("records"));
        let mut status = ctx.status.subscribe();

        assert!(tick(&ctx).await.unwrap().is_none());
        assert_eq!(status.try_recv().unwrap().code, StatusCode::Error);
        assert!(harness
            .db
            .get_marks_for_session(&harness.session_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cadence_follows_interval_changes_between_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        settings.set_interval_secs(10).unwrap();

        let started = Instant::now();
        let mut cadence = Cadence::new(settings.interval_secs());
        cadence.tick().await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(cadence.follow(&settings), None);

        cadence.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(10));

        settings.set_interval_secs(3).unwrap();
        assert_eq!(cadence.follow(&settings), Some(10));
        assert_eq!(cadence.period_secs(), 3);

        cadence.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(13));
        cadence.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(16));
        assert_eq!(cadence.follow(&settings), None);
    }
}
