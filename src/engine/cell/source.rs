//! What the cell engine needs from the platform's telephony stack.

use super::observation::RawIdentity;
use super::signal::NetworkType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Absent,
    Unknown,
    Locked,
    Ready,
}

impl SimState {
    /// Cell updates are skipped unless a SIM is present in a known state.
    pub fn allows_updates(&self) -> bool {
        !matches!(self, SimState::Absent | SimState::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalStrength {
    /// GSM-style RSSI ASU (0..=31, 99 unknown).
    pub gsm_asu: i32,
}

/// Telephony callbacks the engine reacts to. Every one of them triggers a
/// full re-enumeration of visible cells.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyEvent {
    SignalStrengths(SignalStrength),
    CellLocation,
    ServiceState,
    DataConnectionState,
    CellInfo,
}

/// A cell from the rich enumeration API.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCellInfo {
    Gsm {
        registered: bool,
        identity: RawIdentity,
        asu: i32,
    },
    Wcdma {
        registered: bool,
        identity: RawIdentity,
        /// RSCP ASU.
        asu: i32,
    },
    Lte {
        registered: bool,
        identity: RawIdentity,
        /// RSRP ASU.
        asu: i32,
    },
}

/// Serving cell location from the legacy API.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ServingCell {
    pub lac: Option<i32>,
    pub cid: Option<i32>,
    pub psc: Option<i32>,
}

/// Neighbour entry from the legacy API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborCell {
    pub network_type: NetworkType,
    pub lac: Option<i32>,
    pub cid: Option<i32>,
    pub psc: Option<i32>,
    pub rssi: i32,
}

/// Reads the current LTE RSRP in dBm, when the platform exposes it.
pub type LteRsrpProbe = Box<dyn Fn() -> Option<i32> + Send + Sync>;

pub trait TelephonySource: Send + Sync {
    fn sim_state(&self) -> SimState;

    /// Rich enumeration. An empty list means "not supported or nothing seen".
    fn all_cell_info(&self) -> Vec<RawCellInfo>;

    fn network_type(&self) -> NetworkType;

    /// Registered operator as MCC followed by MNC, e.g. `"25001"`.
    fn network_operator(&self) -> Option<String>;

    fn serving_cell(&self) -> Option<ServingCell>;

    fn neighboring_cells(&self) -> Vec<NeighborCell>;

    /// Capability check performed once when the engine is built.
    fn lte_rsrp_probe(&self) -> Option<LteRsrpProbe> {
        None
    }

    fn set_listening(&self, listening: bool);
}

/// Splits an operator string into (MCC, MNC).
pub fn split_operator(operator: &str) -> (Option<i32>, Option<i32>) {
    let operator = operator.trim();
    if operator.len() < 4 || !operator.is_char_boundary(3) {
        return (None, None);
    }
    let (mcc, mnc) = operator.split_at(3);
    (mcc.parse().ok(), mnc.parse().ok())
}

/// Host without a modem: no SIM, no cells.
pub struct NoTelephony;

impl TelephonySource for NoTelephony {
    fn sim_state(&self) -> SimState {
        SimState::Absent
    }

    fn all_cell_info(&self) -> Vec<RawCellInfo> {
        Vec::new()
    }

    fn network_type(&self) -> NetworkType {
        NetworkType::Unknown
    }

    fn network_operator(&self) -> Option<String> {
        None
    }

    fn serving_cell(&self) -> Option<ServingCell> {
        None
    }

    fn neighboring_cells(&self) -> Vec<NeighborCell> {
        Vec::new()
    }

    fn set_listening(&self, _listening: bool) {}
}
