use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::engine::sensor::SensorKind;

pub const MIN_INTERVAL_SECS: u64 = 1;
pub const MAX_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorFlags {
    pub accelerometer: bool,
    pub linear_acceleration: bool,
    pub gyroscope: bool,
    pub magnetometer: bool,
    pub orientation: bool,
}

impl Default for SensorFlags {
    fn default() -> Self {
        Self {
            accelerometer: true,
            linear_acceleration: false,
            gyroscope: false,
            magnetometer: false,
            orientation: false,
        }
    }
}

impl SensorFlags {
    pub fn get(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Accelerometer => self.accelerometer,
            SensorKind::LinearAcceleration => self.linear_acceleration,
            SensorKind::Gyroscope => self.gyroscope,
            SensorKind::Magnetometer => self.magnetometer,
            SensorKind::Orientation => self.orientation,
        }
    }

    pub fn set(&mut self, kind: SensorKind, enabled: bool) {
        match kind {
            SensorKind::Accelerometer => self.accelerometer = enabled,
            SensorKind::LinearAcceleration => self.linear_acceleration = enabled,
            SensorKind::Gyroscope => self.gyroscope = enabled,
            SensorKind::Magnetometer => self.magnetometer = enabled,
            SensorKind::Orientation => self.orientation = enabled,
        }
    }

    pub fn any(&self) -> bool {
        SensorKind::ALL.iter().any(|kind| self.get(*kind))
    }
}

/// Paired external device, stored as address plus display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalDevice {
    pub address: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub interval_secs: u64,
    pub sensors: SensorFlags,
    pub gps_enabled: bool,
    pub mic_enabled: bool,
    pub external_enabled: bool,
    /// Prefer the rich cell enumeration over serving cell + neighbours.
    pub rich_cell_info: bool,
    pub volume_mark_trigger: bool,
    pub keep_screen_on: bool,
    pub user_name: String,
    pub current_session_id: Option<String>,
    pub marks_count: u64,
    pub records_count: u64,
    pub external_device: Option<ExternalDevice>,
    /// Header JSON last received from the external device.
    pub external_header: Option<String>,
    pub mic_calibration_delta: f64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            sensors: SensorFlags::default(),
            gps_enabled: true,
            mic_enabled: false,
            external_enabled: false,
            rich_cell_info: true,
            volume_mark_trigger: false,
            keep_screen_on: false,
            user_name: "User1".into(),
            current_session_id: None,
            marks_count: 0,
            records_count: 0,
            external_device: None,
            external_header: None,
            mic_calibration_delta: 0.0,
        }
    }
}

/// Outcome of setting the logging interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalChange {
    Accepted(u64),
    /// The request was out of range; `applied` is what got stored.
    Clamped { requested: u64, applied: u64 },
}

impl IntervalChange {
    pub fn applied(&self) -> u64 {
        match self {
            IntervalChange::Accepted(value) => *value,
            IntervalChange::Clamped { applied, .. } => *applied,
        }
    }
}

pub fn clamp_interval(requested: u64) -> IntervalChange {
    let applied = requested.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS);
    if applied == requested {
        IntervalChange::Accepted(applied)
    } else {
        IntervalChange::Clamped { requested, applied }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Preferences>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Settings at {} are unreadable, using defaults: {err}", path.display());
                Preferences::default()
            })
        } else {
            Preferences::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, Preferences> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Preferences> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn preferences(&self) -> Preferences {
        self.read().clone()
    }

    /// Applies `change` and persists the result.
    pub fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Preferences),
    {
        let mut guard = self.write();
        change(&mut guard);
        self.persist(&guard)
    }

    pub fn interval_secs(&self) -> u64 {
        clamp_interval(self.read().interval_secs).applied()
    }

    pub fn set_interval_secs(&self, requested: u64) -> Result<IntervalChange> {
        let change = clamp_interval(requested);
        if let IntervalChange::Clamped { requested, applied } = change {
            warn!(
                "Logging interval {requested}s is outside {MIN_INTERVAL_SECS}..={MAX_INTERVAL_SECS}, using {applied}s"
            );
        }
        self.update(|prefs| prefs.interval_secs = change.applied())?;
        Ok(change)
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.read().current_session_id.clone()
    }

    pub fn external_header(&self) -> Option<String> {
        self.read().external_header.clone()
    }

    pub fn set_external_header(&self, header: Option<String>) -> Result<()> {
        self.update(|prefs| prefs.external_header = header)
    }

    pub fn disable_sensor(&self, kind: SensorKind) -> Result<()> {
        self.update(|prefs| prefs.sensors.set(kind, false))
    }

    /// Adds to the mark and record counters of the open session.
    pub fn bump_counters(&self, marks: u64, records: u64) -> Result<(u64, u64)> {
        let mut guard = self.write();
        guard.marks_count = guard.marks_count.saturating_add(marks);
        guard.records_count = guard.records_count.saturating_add(records);
        let totals = (guard.marks_count, guard.records_count);
        self.persist(&guard)?;
        Ok(totals)
    }

    /// Takes back what [`bump_counters`](Self::bump_counters) added.
    pub fn retract_counters(&self, marks: u64, records: u64) -> Result<(u64, u64)> {
        let mut guard = self.write();
        guard.marks_count = guard.marks_count.saturating_sub(marks);
        guard.records_count = guard.records_count.saturating_sub(records);
        let totals = (guard.marks_count, guard.records_count);
        self.persist(&guard)?;
        Ok(totals)
    }

    fn persist(&self, data: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SettingsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn interval_is_clamped_both_ways() {
        let (_dir, store) = store();
        assert_eq!(
            store.set_interval_secs(0).unwrap(),
            IntervalChange::Clamped {
                requested: 0,
                applied: 1
            }
        );
        assert_eq!(store.interval_secs(), 1);

        assert_eq!(
            store.set_interval_secs(100_000).unwrap(),
            IntervalChange::Clamped {
                requested: 100_000,
                applied: 3600
            }
        );
        assert_eq!(store.interval_secs(), 3600);

        assert_eq!(store.set_interval_secs(30).unwrap(), IntervalChange::Accepted(30));
    }

    #[test]
    fn changes_survive_reload() {
        let (dir, store) = store();
        store
            .update(|prefs| {
                prefs.user_name = "surveyor".into();
                prefs.sensors.gyroscope = true;
            })
            .unwrap();
        store.bump_counters(2, 6).unwrap();
        assert_eq!(store.retract_counters(1, 2).unwrap(), (1, 4));

        let reopened = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let prefs = reopened.preferences();
        assert_eq!(prefs.user_name, "surveyor");
        assert!(prefs.sensors.gyroscope);
        assert_eq!((prefs.marks_count, prefs.records_count), (1, 4));
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.preferences(), Preferences::default());
    }

    #[test]
    fn partial_file_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"interval_secs": 15, "sensors": {"gyroscope": true}}"#).unwrap();
        let store = SettingsStore::new(path).unwrap();
        let prefs = store.preferences();
        assert_eq!(prefs.interval_secs, 15);
        assert!(prefs.sensors.gyroscope);
        assert!(prefs.sensors.accelerometer);
        assert!(prefs.gps_enabled);
    }
}
