use serde::{Deserialize, Serialize};

use super::signal::{Generation, NetworkType, UNKNOWN_DBM};
use crate::engine::reading::{Column, Reading};

pub const CELL_READING_TITLE: &str = "Cell Info";

const MAX_AREA_CODE: i32 = 65_535;
const MAX_GSM_CID: i32 = 65_535;
const MAX_UTRAN_CID: i32 = 268_435_455;
const MAX_PSC: i32 = 511;
const MAX_PCI: i32 = 503;
const MAX_COUNTRY_CODE: i32 = 999;
const MAX_NETWORK_CODE: i32 = 999;

/// One visible cell tower after range normalisation. `None` identifiers are
/// "undefined": either unreported or outside the generation's valid range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellTowerObservation {
    pub generation: Generation,
    pub network_type: NetworkType,
    pub active: bool,
    pub mcc: Option<i32>,
    pub mnc: Option<i32>,
    /// LAC on 2G/3G, TAC on 4G.
    pub lac: Option<i32>,
    /// CID on 2G/3G, CI on 4G.
    pub cid: Option<i32>,
    /// PSC on 3G, PCI on 4G.
    pub psc: Option<i32>,
    pub power_dbm: i32,
}

/// Identifiers as reported by the radio, before normalisation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawIdentity {
    pub mcc: Option<i32>,
    pub mnc: Option<i32>,
    pub lac: Option<i32>,
    pub cid: Option<i32>,
    pub psc: Option<i32>,
}

fn exclusive(value: Option<i32>, max: i32) -> Option<i32> {
    value.filter(|v| *v > 0 && *v < max)
}

fn inclusive(value: Option<i32>, max: i32) -> Option<i32> {
    value.filter(|v| (0..=max).contains(v))
}

impl CellTowerObservation {
    pub fn new(network_type: NetworkType, active: bool, raw: RawIdentity, power_dbm: i32) -> Self {
        let generation = network_type.generation();
        let (lac, cid, psc) = normalize_identity(generation, raw.lac, raw.cid, raw.psc);
        Self {
            generation,
            network_type,
            active,
            mcc: inclusive(raw.mcc, MAX_COUNTRY_CODE),
            mnc: inclusive(raw.mnc, MAX_NETWORK_CODE),
            lac,
            cid,
            psc,
            power_dbm,
        }
    }

    /// Stand-in emitted when nothing usable is visible.
    pub fn undefined(active: bool) -> Self {
        Self {
            generation: Generation::Unknown,
            network_type: NetworkType::Unknown,
            active,
            mcc: None,
            mnc: None,
            lac: None,
            cid: None,
            psc: None,
            power_dbm: UNKNOWN_DBM,
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.generation == Generation::Unknown
            && self.mcc.is_none()
            && self.mnc.is_none()
            && self.lac.is_none()
            && self.cid.is_none()
            && self.psc.is_none()
    }

    pub fn to_reading(&self) -> Reading {
        let description = if self.active { "serving" } else { "neighbor" };
        Reading::new(
            CELL_READING_TITLE,
            vec![
                Column::new("gen")
                    .named("Generation")
                    .with_value(Some(self.generation.as_str().into())),
                Column::new("type")
                    .named("Network type")
                    .with_value(Some(self.network_type.as_str().into())),
                Column::new("active")
                    .named("Serving cell")
                    .with_value(Some(self.active.into())),
                Column::new("mcc")
                    .named("Mobile country code")
                    .with_value(self.mcc.map(Into::into)),
                Column::new("mnc")
                    .named("Mobile network code")
                    .with_value(self.mnc.map(Into::into)),
                Column::new("lac")
                    .named("Location/tracking area code")
                    .with_value(self.lac.map(Into::into)),
                Column::new("cid")
                    .named("Cell identity")
                    .with_value(self.cid.map(Into::into)),
                Column::new("psc")
                    .named("Scrambling code / physical cell id")
                    .with_value(self.psc.map(Into::into)),
                Column::new("power")
                    .named("Signal strength")
                    .with_unit("dBm")
                    .with_value(Some(self.power_dbm.into())),
            ],
        )
        .with_description(description)
    }

    /// Row used by the text serialisation of a cell snapshot.
    pub fn to_row(&self) -> String {
        self.to_reading().to_row()
    }
}

/// Applies the per-generation valid ranges to (lac, cid, psc). Values outside
/// the range come back as `None`.
pub fn normalize_identity(
    generation: Generation,
    lac: Option<i32>,
    cid: Option<i32>,
    psc: Option<i32>,
) -> (Option<i32>, Option<i32>, Option<i32>) {
    match generation {
        Generation::Gen2 => (
            exclusive(lac, MAX_AREA_CODE),
            exclusive(cid, MAX_GSM_CID),
            None,
        ),
        Generation::Gen3 => (
            exclusive(lac, MAX_AREA_CODE),
            exclusive(cid, MAX_UTRAN_CID),
            inclusive(psc, MAX_PSC),
        ),
        Generation::Gen4 => (
            exclusive(lac, MAX_AREA_CODE),
            exclusive(cid, MAX_UTRAN_CID),
            inclusive(psc, MAX_PCI),
        ),
        Generation::Unknown => (None, None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_generation_area_code_bounds() {
        assert_eq!(
            normalize_identity(Generation::Gen2, Some(70_000), Some(10), None).0,
            None
        );
        assert_eq!(
            normalize_identity(Generation::Gen2, Some(100), Some(10), None).0,
            Some(100)
        );
        assert_eq!(
            normalize_identity(Generation::Gen2, Some(0), Some(65_535), None),
            (None, None, None)
        );
    }

    #[test]
    fn third_generation_allows_long_cell_ids() {
        let (lac, cid, psc) =
            normalize_identity(Generation::Gen3, Some(4_021), Some(268_435_454), Some(511));
        assert_eq!((lac, cid, psc), (Some(4_021), Some(268_435_454), Some(511)));

        let (_, cid, psc) =
            normalize_identity(Generation::Gen3, Some(4_021), Some(268_435_455), Some(512));
        assert_eq!((cid, psc), (None, None));
    }

    #[test]
    fn fourth_generation_pci_range() {
        let (_, _, pci) = normalize_identity(Generation::Gen4, Some(1), Some(1), Some(503));
        assert_eq!(pci, Some(503));
        let (_, _, pci) = normalize_identity(Generation::Gen4, Some(1), Some(1), Some(504));
        assert_eq!(pci, None);
        let (_, _, pci) = normalize_identity(Generation::Gen4, Some(1), Some(1), Some(-1));
        assert_eq!(pci, None);
    }

    #[test]
    fn country_and_network_codes_are_bounded() {
        let raw = RawIdentity {
            mcc: Some(1_000),
            mnc: Some(-1),
            lac: Some(5),
            cid: Some(6),
            psc: None,
        };
        let observation = CellTowerObservation::new(NetworkType::Edge, true, raw, -81);
        assert_eq!(observation.mcc, None);
        assert_eq!(observation.mnc, None);
        assert_eq!(observation.lac, Some(5));
        assert_eq!(observation.generation, Generation::Gen2);
    }

    #[test]
    fn undefined_reading_shows_placeholders() {
        let reading = CellTowerObservation::undefined(true).to_reading();
        assert_eq!(reading.title, CELL_READING_TITLE);
        assert_eq!(reading.to_row(), "unknown;unknown;true;n/a;n/a;n/a;n/a;n/a;0");
    }
}
