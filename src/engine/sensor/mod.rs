//! Motion sensors plus the nested GPS and microphone engines.

pub mod audio;
pub mod gps;
pub mod source;
pub mod throttle;

pub use audio::AudioEngine;
pub use gps::{GeoPoint, GpsEngine, LocationFix};
pub use source::{LocationSource, MicrophoneSource, SensorHub, SensorKind};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::Result;
use log::{info, warn};
use tokio::sync::broadcast;

use self::throttle::Throttle;
use super::{Engine, EngineEvent, EngineKind, EventHub, Reading};
use crate::settings::SettingsStore;

struct Channel {
    reading: Reading,
    throttle: Throttle,
}

#[derive(Default)]
struct SensorState {
    channels: BTreeMap<SensorKind, Channel>,
    gps_running: bool,
    mic_running: bool,
}

pub struct SensorEngine {
    hub: Arc<dyn SensorHub>,
    settings: Arc<SettingsStore>,
    gps: GpsEngine,
    audio: AudioEngine,
    state: Mutex<SensorState>,
    events: EventHub,
}

impl SensorEngine {
    pub fn new(
        hub: Arc<dyn SensorHub>,
        location: Arc<dyn LocationSource>,
        microphone: Arc<dyn MicrophoneSource>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        let events = EventHub::new();
        Self {
            hub,
            gps: GpsEngine::new(location, events.clone()),
            audio: AudioEngine::new(microphone, Arc::clone(&settings), events.clone()),
            settings,
            state: Mutex::new(SensorState::default()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, SensorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn gps(&self) -> &GpsEngine {
        &self.gps
    }

    pub fn audio(&self) -> &AudioEngine {
        &self.audio
    }

    pub fn active_sensors(&self) -> Vec<SensorKind> {
        self.state().channels.keys().copied().collect()
    }

    /// Registers every enabled sensor whose hardware exists. Flags for
    /// missing hardware are switched off and persisted; the returned list
    /// names what was missing and is also published as one event. If any
    /// step fails, whatever was already started is torn down again.
    pub fn start_with_report(&self) -> Result<Vec<String>> {
        self.stop();

        let mut missing = Vec::new();
        if let Err(err) = self.bring_up(&mut missing) {
            self.stop();
            return Err(err);
        }

        if !missing.is_empty() {
            warn!("Disabled missing hardware: {}", missing.join(", "));
            self.events.publish(EngineEvent::HardwareMissing {
                kind: EngineKind::Sensor,
                missing: missing.clone(),
            });
        }

        info!("Sensor engine started with {:?}", self.active_sensors());
        Ok(missing)
    }

    /// Starts hardware one piece at a time, recording each piece in the
    /// state as soon as it runs so `stop` can always undo it.
    fn bring_up(&self, missing: &mut Vec<String>) -> Result<()> {
        let prefs = self.settings.preferences();

        for kind in SensorKind::ALL {
            if !prefs.sensors.get(kind) {
                continue;
            }
            if !self.hub.is_available(kind) {
                self.settings.disable_sensor(kind)?;
                missing.push(kind.title().to_string());
                continue;
            }
            self.hub.register(kind)?;
            self.state().channels.insert(
                kind,
                Channel {
                    reading: kind.blank_reading(),
                    throttle: Throttle::default(),
                },
            );
        }

        if prefs.gps_enabled {
            if self.gps.is_available() {
                self.gps.start()?;
                self.state().gps_running = true;
            } else {
                self.settings.update(|prefs| prefs.gps_enabled = false)?;
                missing.push(gps::GPS_READING_TITLE.to_string());
            }
        }

        if prefs.mic_enabled {
            if self.audio.is_available() {
                self.audio.start()?;
                self.state().mic_running = true;
            } else {
                self.settings.update(|prefs| prefs.mic_enabled = false)?;
                missing.push(audio::AUDIO_READING_TITLE.to_string());
            }
        }

        Ok(())
    }

    /// Hardware callback. Every sample for a started sensor overwrites the
    /// Reading, so the last value in a window wins; observers hear about it
    /// at most once per window. Returns whether an update was published.
    pub fn on_sensor_changed(&self, kind: SensorKind, values: &[f32], at: Instant) -> bool {
        let title = {
            let mut state = self.state();
            let Some(channel) = state.channels.get_mut(&kind) else {
                return false;
            };
            for (key, value) in kind.column_keys().iter().zip(values) {
                channel.reading.set(key, Some((*value).into()));
            }
            if !channel.throttle.accept(at) {
                return false;
            }
            channel.reading.title.clone()
        };

        self.events.publish(EngineEvent::Updated {
            kind: EngineKind::Sensor,
            title,
        });
        true
    }

    pub fn reading(&self, kind: SensorKind) -> Option<Reading> {
        self.state()
            .channels
            .get(&kind)
            .map(|channel| channel.reading.clone())
    }
}

impl Engine for SensorEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sensor
    }

    fn is_enabled(&self) -> bool {
        let prefs = self.settings.preferences();
        prefs.sensors.any() || prefs.gps_enabled || prefs.mic_enabled
    }

    fn start(&self) -> Result<()> {
        self.start_with_report().map(|_| ())
    }

    fn stop(&self) {
        let (gps_running, mic_running, had_channels) = {
            let mut state = self.state();
            let had_channels = !state.channels.is_empty();
            state.channels.clear();
            (
                std::mem::take(&mut state.gps_running),
                std::mem::take(&mut state.mic_running),
                had_channels,
            )
        };
        if had_channels {
            self.hub.unregister_all();
        }
        if gps_running {
            self.gps.stop();
        }
        if mic_running {
            self.audio.stop();
        }
    }

    fn data(&self) -> Vec<Reading> {
        let (mut readings, gps_running, mic_running) = {
            let state = self.state();
            (
                state
                    .channels
                    .values()
                    .map(|channel| channel.reading.clone())
                    .collect::<Vec<_>>(),
                state.gps_running,
                state.mic_running,
            )
        };
        if gps_running {
            readings.push(self.gps.reading());
        }
        if mic_running {
            readings.push(self.audio.reading());
        }
        readings
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
