//! Cellular telemetry: re-enumerates visible towers on every telephony
//! callback and keeps a normalised snapshot with the serving cell first.

pub mod observation;
pub mod signal;
pub mod source;

pub use observation::{CellTowerObservation, RawIdentity, CELL_READING_TITLE};
pub use signal::{asu_to_dbm, Generation, NetworkType};
pub use source::{SimState, TelephonyEvent, TelephonySource};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, RwLock,
};

use anyhow::Result;
use log::{debug, info};
use tokio::sync::broadcast;

use self::signal::{gsm_asu_to_dbm, UNKNOWN_DBM};
use self::source::{split_operator, LteRsrpProbe, RawCellInfo, SignalStrength};
use super::{Engine, EngineEvent, EngineKind, EventHub, Reading};
use crate::settings::SettingsStore;

pub struct CellEngine {
    source: Arc<dyn TelephonySource>,
    settings: Arc<SettingsStore>,
    lte_rsrp: Option<LteRsrpProbe>,
    snapshot: RwLock<Vec<CellTowerObservation>>,
    last_signal: Mutex<Option<SignalStrength>>,
    listening: AtomicBool,
    events: EventHub,
}

impl CellEngine {
    pub fn new(source: Arc<dyn TelephonySource>, settings: Arc<SettingsStore>) -> Self {
        let lte_rsrp = source.lte_rsrp_probe();
        if lte_rsrp.is_none() {
            info!("LTE RSRP accessor not available; LTE legacy power will read 0");
        }
        Self {
            source,
            settings,
            lte_rsrp,
            snapshot: RwLock::new(finalize(Vec::new())),
            last_signal: Mutex::new(None),
            listening: AtomicBool::new(false),
            events: EventHub::new(),
        }
    }

    /// Current observations, serving cell first. Never empty.
    pub fn observations(&self) -> Vec<CellTowerObservation> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Telephony callback entry point.
    pub fn on_telephony_event(&self, event: TelephonyEvent) {
        if !self.listening.load(Ordering::SeqCst) {
            return;
        }

        if let TelephonyEvent::SignalStrengths(signal) = &event {
            *self
                .last_signal
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(*signal);
        }

        let sim = self.source.sim_state();
        if !sim.allows_updates() {
            debug!("Skipping cell update, SIM state {sim:?}");
            return;
        }

        self.refresh();
    }

    /// Re-enumerates cells and swaps the snapshot in one write.
    pub fn refresh(&self) {
        let prefer_rich = self.settings.preferences().rich_cell_info;
        let mut observations = if prefer_rich {
            self.rich_observations()
        } else {
            Vec::new()
        };
        if observations.is_empty() {
            observations = self.legacy_observations();
        }

        let observations = finalize(observations);
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = observations;

        self.events.publish(EngineEvent::Updated {
            kind: EngineKind::Cell,
            title: CELL_READING_TITLE.to_string(),
        });
    }

    fn rich_observations(&self) -> Vec<CellTowerObservation> {
        self.source
            .all_cell_info()
            .into_iter()
            .map(|info| match info {
                RawCellInfo::Gsm {
                    registered,
                    identity,
                    asu,
                } => CellTowerObservation::new(
                    NetworkType::Gsm,
                    registered,
                    identity,
                    asu_to_dbm(asu, NetworkType::Gsm),
                ),
                RawCellInfo::Wcdma {
                    registered,
                    identity,
                    asu,
                } => CellTowerObservation::new(
                    NetworkType::Umts,
                    registered,
                    identity,
                    asu_to_dbm(asu, NetworkType::Umts),
                ),
                RawCellInfo::Lte {
                    registered,
                    identity,
                    asu,
                } => CellTowerObservation::new(
                    NetworkType::Lte,
                    registered,
                    identity,
                    asu_to_dbm(asu, NetworkType::Lte),
                ),
            })
            .collect()
    }

    fn legacy_observations(&self) -> Vec<CellTowerObservation> {
        let network_type = self.source.network_type();
        let (mcc, mnc) = self
            .source
            .network_operator()
            .map(|operator| split_operator(&operator))
            .unwrap_or((None, None));

        let mut observations = Vec::new();

        if let Some(serving) = self.source.serving_cell() {
            let power = if network_type.generation() == Generation::Gen4 {
                self.lte_rsrp
                    .as_ref()
                    .and_then(|probe| probe())
                    .unwrap_or(UNKNOWN_DBM)
            } else {
                self.last_signal
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .map(|signal| gsm_asu_to_dbm(signal.gsm_asu))
                    .unwrap_or(UNKNOWN_DBM)
            };
            let identity = RawIdentity {
                mcc,
                mnc,
                lac: serving.lac,
                cid: serving.cid,
                psc: serving.psc,
            };
            observations.push(CellTowerObservation::new(network_type, true, identity, power));
        }

        for neighbor in self.source.neighboring_cells() {
            let identity = RawIdentity {
                mcc,
                mnc,
                lac: neighbor.lac,
                cid: neighbor.cid,
                psc: neighbor.psc,
            };
            observations.push(CellTowerObservation::new(
                neighbor.network_type,
                false,
                identity,
                asu_to_dbm(neighbor.rssi, neighbor.network_type),
            ));
        }

        observations
    }

    /// Serialises the snapshot as `;`-separated rows. The read lock is held
    /// for the whole pass so a concurrent refresh cannot swap the list
    /// underneath it.
    pub fn to_rows(&self) -> Vec<String> {
        let guard = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.iter().map(CellTowerObservation::to_row).collect()
    }
}

/// Serving cells first (stable), and never an empty list.
fn finalize(mut observations: Vec<CellTowerObservation>) -> Vec<CellTowerObservation> {
    if observations.is_empty() {
        return vec![CellTowerObservation::undefined(true)];
    }
    if !observations.iter().any(|observation| observation.active) {
        observations.insert(0, CellTowerObservation::undefined(true));
    }
    observations.sort_by_key(|observation| !observation.active);
    observations
}

impl Engine for CellEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Cell
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn start(&self) -> Result<()> {
        if !self.listening.swap(true, Ordering::SeqCst) {
            self.source.set_listening(true);
            info!("Cell engine listening");
        }
        Ok(())
    }

    fn stop(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            self.source.set_listening(false);
            info!("Cell engine stopped");
        }
    }

    fn data(&self) -> Vec<Reading> {
        self.observations()
            .iter()
            .map(CellTowerObservation::to_reading)
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::source::{NeighborCell, ServingCell};
    use super::*;

    #[derive(Default)]
    struct ScriptedTelephony {
        sim: Mutex<Option<SimState>>,
        rich: Mutex<Vec<RawCellInfo>>,
        serving: Mutex<Option<ServingCell>>,
        neighbors: Mutex<Vec<NeighborCell>>,
        network: Mutex<Option<NetworkType>>,
        listening: AtomicBool,
        lte_dbm: Option<i32>,
    }

    impl TelephonySource for ScriptedTelephony {
        fn sim_state(&self) -> SimState {
            self.sim.lock().unwrap().unwrap_or(SimState::Ready)
        }

        fn all_cell_info(&self) -> Vec<RawCellInfo> {
            self.rich.lock().unwrap().clone()
        }

        fn network_type(&self) -> NetworkType {
            self.network.lock().unwrap().unwrap_or(NetworkType::Edge)
        }

        fn network_operator(&self) -> Option<String> {
            Some("25001".into())
        }

        fn serving_cell(&self) -> Option<ServingCell> {
            *self.serving.lock().unwrap()
        }

        fn neighboring_cells(&self) -> Vec<NeighborCell> {
            self.neighbors.lock().unwrap().clone()
        }

        fn lte_rsrp_probe(&self) -> Option<LteRsrpProbe> {
            let dbm = self.lte_dbm?;
            Some(Box::new(move || Some(dbm)))
        }

        fn set_listening(&self, listening: bool) {
            self.listening.store(listening, Ordering::SeqCst);
        }
    }

    fn identity(lac: i32, cid: i32) -> RawIdentity {
        RawIdentity {
            mcc: Some(250),
            mnc: Some(1),
            lac: Some(lac),
            cid: Some(cid),
            psc: None,
        }
    }

    fn engine(source: Arc<ScriptedTelephony>) -> (tempfile::TempDir, CellEngine) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")).unwrap());
        let engine = CellEngine::new(source, settings);
        engine.start().unwrap();
        (dir, engine)
    }

    #[test]
    fn never_empty_without_cells() {
        let source = Arc::new(ScriptedTelephony::default());
        let (_dir, engine) = engine(source.clone());
        assert!(source.listening.load(Ordering::SeqCst));

        engine.on_telephony_event(TelephonyEvent::ServiceState);
        let observations = engine.observations();
        assert_eq!(observations.len(), 1);
        assert!(observations[0].is_undefined());
        assert!(observations[0].active);
    }

    #[test]
    fn serving_cell_sorted_first_keeping_neighbor_order() {
        let source = Arc::new(ScriptedTelephony::default());
        *source.rich.lock().unwrap() = vec![
            RawCellInfo::Gsm {
                registered: false,
                identity: identity(10, 1),
                asu: 10,
            },
            RawCellInfo::Gsm {
                registered: false,
                identity: identity(10, 2),
                asu: 12,
            },
            RawCellInfo::Lte {
                registered: true,
                identity: identity(20, 3),
                asu: 50,
            },
            RawCellInfo::Gsm {
                registered: false,
                identity: identity(10, 4),
                asu: 99,
            },
        ];
        let (_dir, engine) = engine(source);

        engine.on_telephony_event(TelephonyEvent::CellInfo);
        let cids: Vec<_> = engine.observations().iter().map(|o| o.cid).collect();
        assert_eq!(cids, vec![Some(3), Some(1), Some(2), Some(4)]);

        let serving = &engine.observations()[0];
        assert!(serving.active);
        assert_eq!(serving.power_dbm, -90);
        assert_eq!(engine.observations()[3].power_dbm, 0);
    }

    #[test]
    fn falls_back_to_legacy_when_rich_is_empty() {
        let source = Arc::new(ScriptedTelephony::default());
        *source.serving.lock().unwrap() = Some(ServingCell {
            lac: Some(100),
            cid: Some(70_000),
            psc: None,
        });
        *source.neighbors.lock().unwrap() = vec![NeighborCell {
            network_type: NetworkType::Gprs,
            lac: Some(101),
            cid: Some(55),
            psc: None,
            rssi: 16,
        }];
        let (_dir, engine) = engine(source);

        engine.on_telephony_event(TelephonyEvent::SignalStrengths(SignalStrength { gsm_asu: 16 }));
        let observations = engine.observations();
        assert_eq!(observations.len(), 2);

        let serving = &observations[0];
        assert!(serving.active);
        assert_eq!(serving.mcc, Some(250));
        assert_eq!(serving.mnc, Some(1));
        assert_eq!(serving.lac, Some(100));
        assert_eq!(serving.cid, None);
        assert_eq!(serving.power_dbm, -81);

        assert!(!observations[1].active);
        assert_eq!(observations[1].power_dbm, -81);
    }

    #[test]
    fn lte_legacy_power_uses_probe() {
        let source = Arc::new(ScriptedTelephony {
            lte_dbm: Some(-97),
            ..Default::default()
        });
        *source.network.lock().unwrap() = Some(NetworkType::Lte);
        *source.serving.lock().unwrap() = Some(ServingCell {
            lac: Some(7),
            cid: Some(123_456),
            psc: Some(200),
        });
        let (_dir, engine) = engine(source);

        engine.on_telephony_event(TelephonyEvent::CellLocation);
        let serving = &engine.observations()[0];
        assert_eq!(serving.power_dbm, -97);
        assert_eq!(serving.psc, Some(200));
    }

    #[test]
    fn lte_legacy_power_without_probe_is_zero() {
        let source = Arc::new(ScriptedTelephony::default());
        *source.network.lock().unwrap() = Some(NetworkType::Lte);
        *source.serving.lock().unwrap() = Some(ServingCell {
            lac: Some(7),
            cid: Some(123_456),
            psc: Some(200),
        });
        let (_dir, engine) = engine(source);

        engine.on_telephony_event(TelephonyEvent::CellLocation);
        assert_eq!(engine.observations()[0].power_dbm, 0);
    }

    #[test]
    fn neighbors_only_get_an_undefined_serving_slot() {
        let source = Arc::new(ScriptedTelephony::default());
        *source.rich.lock().unwrap() = vec![RawCellInfo::Wcdma {
            registered: false,
            identity: identity(10, 9),
            asu: 20,
        }];
        let (_dir, engine) = engine(source);

        engine.on_telephony_event(TelephonyEvent::CellInfo);
        let observations = engine.observations();
        assert_eq!(observations.len(), 2);
        assert!(observations[0].active && observations[0].is_undefined());
        assert_eq!(observations[1].power_dbm, -96);
    }

    #[test]
    fn missing_sim_keeps_stale_snapshot() {
        let source = Arc::new(ScriptedTelephony::default());
        *source.rich.lock().unwrap() = vec![RawCellInfo::Gsm {
            registered: true,
            identity: identity(10, 1),
            asu: 10,
        }];
        let (_dir, engine) = engine(source.clone());
        engine.on_telephony_event(TelephonyEvent::CellInfo);
        assert_eq!(engine.observations()[0].cid, Some(1));

        *source.sim.lock().unwrap() = Some(SimState::Absent);
        source.rich.lock().unwrap().clear();
        let mut events = engine.subscribe();
        engine.on_telephony_event(TelephonyEvent::CellInfo);
        assert_eq!(engine.observations()[0].cid, Some(1));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn rows_follow_snapshot() {
        let source = Arc::new(ScriptedTelephony::default());
        let (_dir, engine) = engine(source);
        assert_eq!(
            engine.to_rows(),
            vec!["unknown;unknown;true;n/a;n/a;n/a;n/a;n/a;0".to_string()]
        );
    }

    #[test]
    fn stopped_engine_ignores_callbacks() {
        let source = Arc::new(ScriptedTelephony::default());
        *source.rich.lock().unwrap() = vec![RawCellInfo::Gsm {
            registered: true,
            identity: identity(10, 1),
            asu: 10,
        }];
        let (_dir, engine) = engine(source.clone());
        engine.stop();
        assert!(!source.listening.load(Ordering::SeqCst));

        engine.on_telephony_event(TelephonyEvent::CellInfo);
        assert!(engine.observations()[0].is_undefined());
    }
}
