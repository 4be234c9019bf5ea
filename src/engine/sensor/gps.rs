//! Location fix cache.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use super::source::LocationSource;
use crate::engine::{
    reading::{Column, Reading},
    EngineEvent, EngineKind, EventHub,
};

pub const GPS_READING_TITLE: &str = "GPS";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: Option<f32>,
    pub bearing: Option<f32>,
    pub speed: Option<f32>,
    pub satellites: Option<u32>,
    pub time: DateTime<Utc>,
}

impl LocationFix {
    pub fn at(latitude: f64, longitude: f64, time: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            bearing: None,
            speed: None,
            satellites: None,
            time,
        }
    }
}

pub struct GpsEngine {
    source: Arc<dyn LocationSource>,
    fix: Mutex<Option<LocationFix>>,
    running: AtomicBool,
    events: EventHub,
}

impl GpsEngine {
    pub fn new(source: Arc<dyn LocationSource>, events: EventHub) -> Self {
        Self {
            source,
            fix: Mutex::new(None),
            running: AtomicBool::new(false),
            events,
        }
    }

    fn fix_guard(&self) -> MutexGuard<'_, Option<LocationFix>> {
        self.fix.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_available(&self) -> bool {
        self.source.is_available()
    }

    pub fn start(&self) -> Result<()> {
        if !self.running.swap(true, Ordering::SeqCst) {
            if let Err(err) = self.source.start_updates() {
                self.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
            info!("GPS updates started");
        }
        Ok(())
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.source.stop_updates();
            info!("GPS updates stopped");
        }
    }

    /// Replaces the cached fix wholesale.
    pub fn on_location_changed(&self, fix: LocationFix) {
        *self.fix_guard() = Some(fix);
        self.notify();
    }

    /// Drops the cached fix so observers show "no fix".
    pub fn on_provider_disabled(&self) {
        *self.fix_guard() = None;
        self.notify();
    }

    fn notify(&self) {
        self.events.publish(EngineEvent::Updated {
            kind: EngineKind::Sensor,
            title: GPS_READING_TITLE.to_string(),
        });
    }

    pub fn fix(&self) -> Option<LocationFix> {
        self.fix_guard().clone()
    }

    pub fn point(&self) -> Option<GeoPoint> {
        self.fix_guard().as_ref().map(|fix| GeoPoint {
            latitude: fix.latitude,
            longitude: fix.longitude,
        })
    }

    pub fn reading(&self) -> Reading {
        let fix = self.fix();
        let fix = fix.as_ref();
        Reading::new(
            GPS_READING_TITLE,
            vec![
                Column::new("lat")
                    .named("Latitude")
                    .with_unit("deg")
                    .with_value(fix.map(|f| f.latitude.into())),
                Column::new("lon")
                    .named("Longitude")
                    .with_unit("deg")
                    .with_value(fix.map(|f| f.longitude.into())),
                Column::new("alt")
                    .named("Altitude")
                    .with_unit("m")
                    .with_value(fix.and_then(|f| f.altitude).map(Into::into)),
                Column::new("acc")
                    .named("Accuracy")
                    .with_unit("m")
                    .with_value(fix.and_then(|f| f.accuracy).map(Into::into)),
                Column::new("bearing")
                    .named("Bearing")
                    .with_unit("deg")
                    .with_value(fix.and_then(|f| f.bearing).map(Into::into)),
                Column::new("speed")
                    .named("Speed")
                    .with_unit("m/s")
                    .with_value(fix.and_then(|f| f.speed).map(Into::into)),
                Column::new("sat")
                    .named("Satellites")
                    .with_value(fix.and_then(|f| f.satellites).map(Into::into)),
                Column::new("time")
                    .named("Fix time")
                    .with_value(fix.map(|f| f.time.to_rfc3339().into())),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::reading::ColumnValue;
    use crate::engine::sensor::source::NoSensors;

    #[test]
    fn missing_dimensions_read_as_not_available() {
        let engine = GpsEngine::new(Arc::new(NoSensors), EventHub::new());
        let mut fix = LocationFix::at(55.75, 37.61, Utc::now());
        fix.speed = Some(1.5);
        engine.on_location_changed(fix);

        let reading = engine.reading();
        assert_eq!(reading.value("lat"), Some(&ColumnValue::Float(55.75)));
        assert_eq!(reading.value("speed"), Some(&ColumnValue::Float(1.5)));
        assert_eq!(reading.value("alt"), None);
        assert_eq!(reading.value("sat"), None);
        assert_eq!(
            engine.point(),
            Some(GeoPoint {
                latitude: 55.75,
                longitude: 37.61
            })
        );
    }

    #[test]
    fn provider_disabled_clears_fix_and_notifies() {
        let hub = EventHub::new();
        let mut events = hub.subscribe();
        let engine = GpsEngine::new(Arc::new(NoSensors), hub);
        engine.on_location_changed(LocationFix::at(1.0, 2.0, Utc::now()));
        engine.on_provider_disabled();

        assert_eq!(engine.point(), None);
        assert!(engine.reading().columns.iter().all(|c| c.value.is_none()));
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_ok());
    }

    #[test]
    fn start_fails_without_provider() {
        let engine = GpsEngine::new(Arc::new(NoSensors), EventHub::new());
        assert!(engine.start().is_err());
        engine.stop();
    }
}
