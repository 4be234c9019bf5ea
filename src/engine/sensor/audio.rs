//! Microphone level sampler.
//!
//! One recording resource is shared by every consumer: `start` and `stop`
//! are reference counted and only the first start opens the device, only
//! the last stop closes it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use super::source::MicrophoneSource;
use super::throttle::SAMPLE_INTERVAL;
use crate::engine::{
    reading::{Column, Reading},
    EngineEvent, EngineKind, EventHub,
};
use crate::settings::SettingsStore;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "fieldlogger::audio";

pub const AUDIO_READING_TITLE: &str = "Microphone";

/// Full-scale amplitude of 16-bit PCM.
pub const REFERENCE_AMPLITUDE: f64 = 32_767.0;

/// Level in dB relative to full scale, shifted by the user's calibration.
/// Silence (non-positive amplitude) has no level.
pub fn amplitude_to_db(amplitude: i32, calibration_delta: f64) -> Option<f64> {
    if amplitude <= 0 {
        return None;
    }
    Some(20.0 * (f64::from(amplitude) / REFERENCE_AMPLITUDE).log10() + calibration_delta)
}

fn blank_reading() -> Reading {
    Reading::new(
        AUDIO_READING_TITLE,
        vec![Column::new("db").named("Sound level").with_unit("dB")],
    )
}

#[derive(Default)]
struct AudioState {
    locks: usize,
    running: Option<Arc<AtomicBool>>,
    worker: Option<JoinHandle<()>>,
}

pub struct AudioEngine {
    source: Arc<dyn MicrophoneSource>,
    settings: Arc<SettingsStore>,
    reading: Arc<Mutex<Reading>>,
    state: Mutex<AudioState>,
    events: EventHub,
}

impl AudioEngine {
    pub fn new(
        source: Arc<dyn MicrophoneSource>,
        settings: Arc<SettingsStore>,
        events: EventHub,
    ) -> Self {
        Self {
            source,
            settings,
            reading: Arc::new(Mutex::new(blank_reading())),
            state: Mutex::new(AudioState::default()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, AudioState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_available(&self) -> bool {
        self.source.is_available()
    }

    pub fn consumers(&self) -> usize {
        self.state().locks
    }

    pub fn reading(&self) -> Reading {
        self.reading
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.state();
        if state.locks > 0 {
            state.locks += 1;
            return Ok(());
        }

        self.source.open().context("failed to open microphone")?;

        let running = Arc::new(AtomicBool::new(true));
        let worker = thread::Builder::new()
            .name("audio-sampler".to_string())
            .spawn({
                let running = Arc::clone(&running);
                let source = Arc::clone(&self.source);
                let settings = Arc::clone(&self.settings);
                let reading = Arc::clone(&self.reading);
                let events = self.events.clone();
                move || sample_loop(running, source, settings, reading, events)
            });

        let worker = match worker {
            Ok(handle) => handle,
            Err(err) => {
                self.source.close();
                return Err(err).context("failed to spawn audio sampler thread");
            }
        };

        state.locks = 1;
        state.running = Some(running);
        state.worker = Some(worker);
        log_info!(target: LOG_TARGET, "Microphone sampling started");
        Ok(())
    }

    pub fn stop(&self) {
        let (running, worker) = {
            let mut state = self.state();
            match state.locks {
                0 => return,
                1 => {
                    state.locks = 0;
                    (state.running.take(), state.worker.take())
                }
                _ => {
                    state.locks -= 1;
                    return;
                }
            }
        };

        if let Some(flag) = running {
            flag.store(false, Ordering::SeqCst);
        }
        if let Some(handle) = worker {
            if handle.join().is_err() {
                log_warn!(target: LOG_TARGET, "Audio sampler thread panicked");
            }
        }
        self.source.close();
        self.reading
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear_values();
        log_info!(target: LOG_TARGET, "Microphone sampling stopped");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let mut state = self.state();
        if let Some(flag) = state.running.take() {
            flag.store(false, Ordering::SeqCst);
        }
        if let Some(handle) = state.worker.take() {
            let _ = handle.join();
        }
    }
}

fn sample_loop(
    running: Arc<AtomicBool>,
    source: Arc<dyn MicrophoneSource>,
    settings: Arc<SettingsStore>,
    reading: Arc<Mutex<Reading>>,
    events: EventHub,
) {
    while running.load(Ordering::SeqCst) {
        let level = match source.max_amplitude() {
            Ok(amplitude) => {
                amplitude_to_db(amplitude, settings.preferences().mic_calibration_delta)
            }
            Err(err) => {
                log_warn!(target: LOG_TARGET, "Microphone read failed: {err}");
                None
            }
        };

        reading
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set("db", level.map(Into::into));
        events.publish(EngineEvent::Updated {
            kind: EngineKind::Sensor,
            title: AUDIO_READING_TITLE.to_string(),
        });

        thread::sleep(SAMPLE_INTERVAL);
    }
}
