//! Hardware seams for the sensor engine.

use std::io;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::engine::reading::{Column, Reading};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorKind {
    Accelerometer,
    LinearAcceleration,
    Gyroscope,
    Magnetometer,
    Orientation,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Accelerometer,
        SensorKind::LinearAcceleration,
        SensorKind::Gyroscope,
        SensorKind::Magnetometer,
        SensorKind::Orientation,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "Accelerometer",
            SensorKind::LinearAcceleration => "Linear acceleration",
            SensorKind::Gyroscope => "Gyroscope",
            SensorKind::Magnetometer => "Magnetometer",
            SensorKind::Orientation => "Orientation",
        }
    }

    fn axes(&self) -> [(&'static str, &'static str); 3] {
        match self {
            SensorKind::Orientation => [
                ("azimuth", "Azimuth"),
                ("pitch", "Pitch"),
                ("roll", "Roll"),
            ],
            _ => [("x", "X axis"), ("y", "Y axis"), ("z", "Z axis")],
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            SensorKind::Accelerometer | SensorKind::LinearAcceleration => "m/s2",
            SensorKind::Gyroscope => "rad/s",
            SensorKind::Magnetometer => "uT",
            SensorKind::Orientation => "deg",
        }
    }

    pub fn column_keys(&self) -> [&'static str; 3] {
        let [a, b, c] = self.axes();
        [a.0, b.0, c.0]
    }

    /// Empty reading with this sensor's fixed column set.
    pub fn blank_reading(&self) -> Reading {
        let columns = self
            .axes()
            .iter()
            .map(|(key, name)| Column::new(*key).named(*name).with_unit(self.unit()))
            .collect();
        Reading::new(self.title(), columns)
    }
}

/// Motion/position sensors exposed by the platform.
pub trait SensorHub: Send + Sync {
    fn is_available(&self, kind: SensorKind) -> bool;

    fn register(&self, kind: SensorKind) -> Result<()>;

    fn unregister_all(&self);
}

/// Location provider behind the GPS engine.
pub trait LocationSource: Send + Sync {
    fn is_available(&self) -> bool;

    fn start_updates(&self) -> Result<()>;

    fn stop_updates(&self);
}

/// Microphone level source behind the audio engine.
pub trait MicrophoneSource: Send + Sync {
    fn is_available(&self) -> bool;

    fn open(&self) -> io::Result<()>;

    /// Largest absolute sample in the most recent short buffer.
    fn max_amplitude(&self) -> io::Result<i32>;

    fn close(&self);
}

/// Host with none of the sensors; every capability reports missing.
pub struct NoSensors;

impl SensorHub for NoSensors {
    fn is_available(&self, _kind: SensorKind) -> bool {
        false
    }

    fn register(&self, kind: SensorKind) -> Result<()> {
        anyhow::bail!("{} is not available", kind.title())
    }

    fn unregister_all(&self) {}
}

impl LocationSource for NoSensors {
    fn is_available(&self) -> bool {
        false
    }

    fn start_updates(&self) -> Result<()> {
        anyhow::bail!("no location provider")
    }

    fn stop_updates(&self) {}
}

impl MicrophoneSource for NoSensors {
    fn is_available(&self) -> bool {
        false
    }

    fn open(&self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::NotFound, "no microphone"))
    }

    fn max_amplitude(&self) -> io::Result<i32> {
        Err(io::Error::new(io::ErrorKind::NotFound, "no microphone"))
    }

    fn close(&self) {}
}
