//! Network types, generations and ASU → dBm conversion.

use serde::{Deserialize, Serialize};

/// Signal reading that could not be converted.
pub const UNKNOWN_DBM: i32 = 0;

/// ASU value radios report when strength is unknown.
pub const ASU_UNKNOWN: i32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Generation {
    #[serde(rename = "2G")]
    Gen2,
    #[serde(rename = "3G")]
    Gen3,
    #[serde(rename = "4G")]
    Gen4,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Generation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Generation::Gen2 => "2G",
            Generation::Gen3 => "3G",
            Generation::Gen4 => "4G",
            Generation::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkType {
    Gprs,
    Edge,
    Cdma,
    OneXRtt,
    Iden,
    Gsm,
    Umts,
    EvdoRev0,
    EvdoRevA,
    EvdoRevB,
    Hsdpa,
    Hsupa,
    Hspa,
    HspaPlus,
    Ehrpd,
    TdScdma,
    Lte,
    Unknown,
}

impl NetworkType {
    pub fn generation(&self) -> Generation {
        match self {
            NetworkType::Gprs
            | NetworkType::Edge
            | NetworkType::Cdma
            | NetworkType::OneXRtt
            | NetworkType::Iden
            | NetworkType::Gsm => Generation::Gen2,
            NetworkType::Umts
            | NetworkType::EvdoRev0
            | NetworkType::EvdoRevA
            | NetworkType::EvdoRevB
            | NetworkType::Hsdpa
            | NetworkType::Hsupa
            | NetworkType::Hspa
            | NetworkType::HspaPlus
            | NetworkType::Ehrpd
            | NetworkType::TdScdma => Generation::Gen3,
            NetworkType::Lte => Generation::Gen4,
            NetworkType::Unknown => Generation::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Gprs => "GPRS",
            NetworkType::Edge => "EDGE",
            NetworkType::Cdma => "CDMA",
            NetworkType::OneXRtt => "1xRTT",
            NetworkType::Iden => "iDen",
            NetworkType::Gsm => "GSM",
            NetworkType::Umts => "UMTS",
            NetworkType::EvdoRev0 => "EVDO rev. 0",
            NetworkType::EvdoRevA => "EVDO rev. A",
            NetworkType::EvdoRevB => "EVDO rev. B",
            NetworkType::Hsdpa => "HSDPA",
            NetworkType::Hsupa => "HSUPA",
            NetworkType::Hspa => "HSPA",
            NetworkType::HspaPlus => "HSPA+",
            NetworkType::Ehrpd => "eHRPD",
            NetworkType::TdScdma => "TD-SCDMA",
            NetworkType::Lte => "LTE",
            NetworkType::Unknown => "unknown",
        }
    }
}

/// Converts an arbitrary strength unit into dBm for the given radio type.
///
/// * 2G: GSM RSSI ASU `0..=31`, `2·asu − 113`
/// * 3G: RSCP ASU `-5..=91`, `asu − 116`
/// * 4G: RSRP ASU `0..=97`, `asu − 140`
///
/// Anything outside those bounds (including the `99` unknown marker) and
/// unknown radio types map to [`UNKNOWN_DBM`].
pub fn asu_to_dbm(asu: i32, network_type: NetworkType) -> i32 {
    if asu == ASU_UNKNOWN {
        return UNKNOWN_DBM;
    }
    match network_type.generation() {
        Generation::Gen2 => gsm_asu_to_dbm(asu),
        Generation::Gen3 if (-5..=91).contains(&asu) => asu - 116,
        Generation::Gen4 if (0..=97).contains(&asu) => asu - 140,
        _ => UNKNOWN_DBM,
    }
}

/// GSM-style RSSI ASU, also what legacy serving-cell signal strength
/// reports on every generation.
pub fn gsm_asu_to_dbm(asu: i32) -> i32 {
    if (0..=31).contains(&asu) {
        2 * asu - 113
    } else {
        UNKNOWN_DBM
    }
}
