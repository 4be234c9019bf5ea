//! Progress notifications of the logging service.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

const STATUS_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusCode {
    Started,
    Running,
    Finished,
    Error,
}

impl StatusCode {
    /// Integer code carried on the wire.
    pub fn code(&self) -> i32 {
        match self {
            StatusCode::Started => 100,
            StatusCode::Running => 101,
            StatusCode::Finished => 102,
            StatusCode::Error => 103,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub code: StatusCode,
    pub timestamp: DateTime<Utc>,
    /// Records written in the current session so far.
    pub records: u64,
    pub message: Option<String>,
}

/// Lets observers follow the service without holding a reference to it.
/// The most recent status is kept so late subscribers can catch up.
pub struct StatusBroadcaster {
    sender: broadcast::Sender<ServiceStatus>,
    last: Mutex<Option<ServiceStatus>>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STATUS_CAPACITY);
        Self {
            sender,
            last: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceStatus> {
        self.sender.subscribe()
    }

    pub fn last(&self) -> Option<ServiceStatus> {
        self.last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn publish(&self, code: StatusCode, records: u64) {
        self.send(ServiceStatus {
            code,
            timestamp: Utc::now(),
            records,
            message: None,
        });
    }

    pub fn error(&self, records: u64, message: impl Into<String>) {
        self.send(ServiceStatus {
            code: StatusCode::Error,
            timestamp: Utc::now(),
            records,
            message: Some(message.into()),
        });
    }

    fn send(&self, status: ServiceStatus) {
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(status.clone());
        let _ = self.sender.send(status);
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_values() {
        assert_eq!(StatusCode::Started.code(), 100);
        assert_eq!(StatusCode::Running.code(), 101);
        assert_eq!(StatusCode::Finished.code(), 102);
        assert_eq!(StatusCode::Error.code(), 103);
    }

    #[test]
    fn subscribers_and_late_readers_see_updates() {
        let status = StatusBroadcaster::new();
        assert!(status.last().is_none());
        status.publish(StatusCode::Started, 0);

        let mut rx = status.subscribe();
        status.error(4, "storage unavailable");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.code, StatusCode::Error);
        assert_eq!(received.records, 4);
        assert_eq!(status.last().unwrap().message.as_deref(), Some("storage unavailable"));
    }
}
