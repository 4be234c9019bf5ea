pub mod cell;
pub mod external;
pub mod reading;
pub mod sensor;

pub use cell::CellEngine;
pub use external::ExternalDeviceEngine;
pub use reading::{Column, ColumnValue, Reading};
pub use sensor::SensorEngine;

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineKind {
    Cell,
    Sensor,
    External,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Cell => "cell",
            EngineKind::Sensor => "sensor",
            EngineKind::External => "external",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A reading changed; `title` lets observers redraw only that widget.
    Updated { kind: EngineKind, title: String },
    Connected { kind: EngineKind },
    ConnectionLost { kind: EngineKind },
    /// Hardware the configuration asked for is not present.
    HardwareMissing { kind: EngineKind, missing: Vec<String> },
}

/// Fan-out of engine events. Publishing never blocks and never fails when
/// nobody listens; dropping a receiver unsubscribes it.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        // Err only means there are no receivers right now.
        let _ = self.sender.send(event);
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle shared by the cell, sensor and external-device engines.
pub trait Engine: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn is_enabled(&self) -> bool;

    fn start(&self) -> Result<()>;

    fn stop(&self);

    /// Current readings. Never blocks on hardware.
    fn data(&self) -> Vec<Reading>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

/// The three engines a host creates once and shares. Cloning hands out more
/// references to the same engines.
#[derive(Clone)]
pub struct Engines {
    pub cell: Arc<CellEngine>,
    pub sensor: Arc<SensorEngine>,
    pub external: Arc<ExternalDeviceEngine>,
}

impl Engines {
    pub fn get(&self, kind: EngineKind) -> &dyn Engine {
        match kind {
            EngineKind::Cell => self.cell.as_ref(),
            EngineKind::Sensor => self.sensor.as_ref(),
            EngineKind::External => self.external.as_ref(),
        }
    }

    /// Kinds whose configuration currently asks for them.
    pub fn enabled(&self) -> Vec<EngineKind> {
        [EngineKind::Cell, EngineKind::Sensor, EngineKind::External]
            .into_iter()
            .filter(|kind| self.get(*kind).is_enabled())
            .collect()
    }
}
