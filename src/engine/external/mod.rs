//! External sensor board over a serial link.
//!
//! A single worker thread drives the link through
//! `Disconnected → Connecting → HeaderPending → Streaming` and falls back to
//! `Disconnected` whenever the link fails.

pub mod link;
pub mod protocol;

pub use link::{DeviceConnector, DeviceLink, SerialConnector};
pub use protocol::{HeaderError, EXTERNAL_READING_TITLE};

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use self::protocol::{header_reading, parse_data, parse_header, LineBuffer, CMD_DATA, CMD_HEADER};
use super::{Engine, EngineEvent, EngineKind, EventHub, Reading};
use crate::settings::SettingsStore;
use crate::{log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "fieldlogger::external";

pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Ticks to wait for a reply before the command is sent again.
const REPLY_PATIENCE_TICKS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    HeaderPending,
    Streaming,
}

struct Shared {
    state: Mutex<LinkState>,
    /// `None` until a header is known.
    reading: Mutex<Option<Reading>>,
    running: AtomicBool,
    consumers: AtomicUsize,
    link_lost: AtomicBool,
    refresh_header: AtomicBool,
}

impl Shared {
    fn state(&self) -> LinkState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    fn reading(&self) -> MutexGuard<'_, Option<Reading>> {
        self.reading.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct ExternalDeviceEngine {
    connector: Arc<dyn DeviceConnector>,
    settings: Arc<SettingsStore>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    events: EventHub,
}

impl ExternalDeviceEngine {
    pub fn new(connector: Arc<dyn DeviceConnector>, settings: Arc<SettingsStore>) -> Self {
        let cached = settings.external_header().and_then(|header| {
            match parse_header(&header) {
                Ok(columns) => Some(header_reading(columns)),
                Err(err) => {
                    log_warn!(target: LOG_TARGET, "Ignoring cached device header: {err}");
                    None
                }
            }
        });

        Self {
            connector,
            settings,
            shared: Arc::new(Shared {
                state: Mutex::new(LinkState::Disconnected),
                reading: Mutex::new(cached),
                running: AtomicBool::new(false),
                consumers: AtomicUsize::new(0),
                link_lost: AtomicBool::new(false),
                refresh_header: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
            events: EventHub::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn consumers(&self) -> usize {
        self.shared.consumers.load(Ordering::SeqCst)
    }

    /// Platform notice that the link dropped (e.g. an ACL disconnect).
    pub fn on_link_lost(&self) {
        self.shared.link_lost.store(true, Ordering::SeqCst);
    }

    /// Forgets the cached header and asks the board for a new one.
    pub fn refresh_header(&self) -> Result<()> {
        self.settings.set_external_header(None)?;
        self.shared.refresh_header.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn poller(&self) -> Poller {
        Poller {
            connector: Arc::clone(&self.connector),
            settings: Arc::clone(&self.settings),
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            link: None,
            buffer: LineBuffer::default(),
            awaiting: None,
        }
    }
}

impl Engine for ExternalDeviceEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::External
    }

    fn is_enabled(&self) -> bool {
        let prefs = self.settings.preferences();
        prefs.external_enabled && prefs.external_device.is_some()
    }

    fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.shared.consumers.fetch_add(1, Ordering::SeqCst);

        let finished = worker.as_ref().map(JoinHandle::is_finished).unwrap_or(true);
        if !finished {
            return Ok(());
        }
        if let Some(stale) = worker.take() {
            let _ = stale.join();
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let mut poller = self.poller();
        let handle = thread::Builder::new()
            .name("external-device".to_string())
            .spawn(move || poller.run());

        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.consumers.fetch_sub(1, Ordering::SeqCst);
                Err(err).context("failed to spawn external device thread")
            }
        }
    }

    fn stop(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let remaining = self
            .shared
            .consumers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_sub(1))
            })
            .map(|previous| previous.saturating_sub(1))
            .unwrap_or(0);
        if remaining > 0 {
            return;
        }

        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                log_error!(target: LOG_TARGET, "External device thread panicked");
            }
        }
        self.shared.set_state(LinkState::Disconnected);
    }

    fn data(&self) -> Vec<Reading> {
        self.shared.reading().clone().into_iter().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

impl Drop for ExternalDeviceEngine {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }
}

/// State owned by the worker thread.
struct Poller {
    connector: Arc<dyn DeviceConnector>,
    settings: Arc<SettingsStore>,
    shared: Arc<Shared>,
    events: EventHub,
    link: Option<Box<dyn DeviceLink>>,
    buffer: LineBuffer,
    /// Command sent and not answered yet, with ticks waited.
    awaiting: Option<(u8, u32)>,
}

impl Poller {
    fn run(&mut self) {
        log_info!(target: LOG_TARGET, "External device loop started");
        while self.shared.running.load(Ordering::SeqCst) {
            self.step();
            thread::sleep(POLL_INTERVAL);
        }
        self.link = None;
        log_info!(target: LOG_TARGET, "External device loop stopped");
    }

    fn step(&mut self) {
        if self.shared.link_lost.swap(false, Ordering::SeqCst) && self.link.is_some() {
            self.fail("link dropped");
            return;
        }

        match self.shared.state() {
            LinkState::Disconnected | LinkState::Connecting => self.connect(),
            LinkState::HeaderPending | LinkState::Streaming => {
                if let Err(err) = self.exchange() {
                    self.fail(&err.to_string());
                }
            }
        }
    }

    fn connect(&mut self) {
        let Some(device) = self.settings.preferences().external_device else {
            return;
        };
        if !self.connector.adapter_enabled() || !self.connector.is_bonded(&device.address) {
            return;
        }

        self.shared.set_state(LinkState::Connecting);
        match self.connector.connect(&device.address) {
            Ok(link) => {
                self.link = Some(link);
                self.buffer.clear();
                self.awaiting = None;
                let has_header = self.shared.reading().is_some()
                    && !self.shared.refresh_header.load(Ordering::SeqCst);
                self.shared.set_state(if has_header {
                    LinkState::Streaming
                } else {
                    LinkState::HeaderPending
                });
                log_info!(target: LOG_TARGET, "Connected to {} ({})", device.name, device.address);
                self.events.publish(EngineEvent::Connected {
                    kind: EngineKind::External,
                });
            }
            Err(err) => {
                log_warn!(target: LOG_TARGET, "Connecting to {} failed: {err}", device.address);
                self.shared.set_state(LinkState::Disconnected);
            }
        }
    }

    fn exchange(&mut self) -> std::io::Result<()> {
        if self.shared.refresh_header.swap(false, Ordering::SeqCst) {
            self.shared.set_state(LinkState::HeaderPending);
            self.buffer.clear();
            self.awaiting = None;
        }
        let Some(link) = self.link.as_mut() else {
            self.shared.set_state(LinkState::Disconnected);
            return Ok(());
        };

        let state = self.shared.state();
        match self.awaiting {
            Some((_, waited)) if waited < REPLY_PATIENCE_TICKS => {
                self.awaiting = self.awaiting.map(|(command, waited)| (command, waited + 1));
            }
            _ => {
                let command = if state == LinkState::HeaderPending {
                    CMD_HEADER
                } else {
                    CMD_DATA
                };
                link.send(command)?;
                self.awaiting = Some((command, 0));
            }
        }

        let mut chunk = [0u8; 256];
        loop {
            let read = link.read_available(&mut chunk)?;
            if read == 0 {
                break;
            }
            self.buffer.push(&chunk[..read]);
        }

        if let Some(line) = self.buffer.next_line() {
            self.awaiting = None;
            match state {
                LinkState::HeaderPending => self.accept_header(&line),
                _ => self.accept_data(&line),
            }
        }
        Ok(())
    }

    fn accept_header(&mut self, line: &str) {
        match parse_header(line) {
            Ok(columns) => {
                log_info!(target: LOG_TARGET, "Device header with {} columns", columns.len());
                *self.shared.reading() = Some(header_reading(columns));
                if let Err(err) = self.settings.set_external_header(Some(line.to_string())) {
                    log_warn!(target: LOG_TARGET, "Failed to cache device header: {err:#}");
                }
                self.shared.set_state(LinkState::Streaming);
                self.publish_update();
            }
            Err(err) => {
                log_warn!(target: LOG_TARGET, "Bad device header: {err}");
            }
        }
    }

    fn accept_data(&mut self, line: &str) {
        let updated = {
            let mut guard = self.shared.reading();
            let Some(reading) = guard.as_mut() else {
                return;
            };
            match parse_data(line, reading.columns.len()) {
                Some(values) => {
                    for (column, value) in reading.columns.iter_mut().zip(values) {
                        column.set_value(Some(value));
                    }
                    true
                }
                None => false,
            }
        };
        if updated {
            self.publish_update();
        }
    }

    fn publish_update(&self) {
        self.events.publish(EngineEvent::Updated {
            kind: EngineKind::External,
            title: EXTERNAL_READING_TITLE.to_string(),
        });
    }

    fn fail(&mut self, reason: &str) {
        log_warn!(target: LOG_TARGET, "Connection lost: {reason}");
        self.link = None;
        self.buffer.clear();
        self.awaiting = None;
        if let Some(reading) = self.shared.reading().as_mut() {
            reading.clear_values();
        }
        self.shared.set_state(LinkState::Disconnected);
        self.events.publish(EngineEvent::ConnectionLost {
            kind: EngineKind::External,
        });

        if self.shared.consumers.load(Ordering::SeqCst) == 0 {
            self.shared.running.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    use crate::engine::reading::ColumnValue;
    use crate::settings::ExternalDevice;

    const HEADER: &str = r#"{"t":{"full":"Temperature","short":"T","unit":"C"},"h":{"full":"Humidity","short":"H","unit":"%"}}"#;

    #[derive(Default)]
    struct Board {
        data: VecDeque<String>,
        sent: Vec<u8>,
        fail_next: bool,
        connects: usize,
        silent: bool,
    }

    struct FakeLink {
        board: Arc<Mutex<Board>>,
        rx: VecDeque<u8>,
    }

    impl DeviceLink for FakeLink {
        fn send(&mut self, command: u8) -> io::Result<()> {
            let mut board = self.board.lock().unwrap();
            if board.fail_next {
                board.fail_next = false;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "socket closed"));
            }
            board.sent.push(command);
            if board.silent {
                return Ok(());
            }
            let reply = match command {
                CMD_HEADER => Some(HEADER.to_string()),
                CMD_DATA => board.data.pop_front(),
                _ => None,
            };
            if let Some(reply) = reply {
                self.rx.extend(reply.bytes());
                self.rx.push_back(b'\n');
            }
            Ok(())
        }

        fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let count = buf.len().min(self.rx.len());
            for slot in buf.iter_mut().take(count) {
                *slot = self.rx.pop_front().unwrap();
            }
            Ok(count)
        }
    }

    struct FakeConnector {
        board: Arc<Mutex<Board>>,
        bonded: bool,
    }

    impl DeviceConnector for FakeConnector {
        fn adapter_enabled(&self) -> bool {
            true
        }

        fn is_bonded(&self, _address: &str) -> bool {
            self.bonded
        }

        fn connect(&self, _address: &str) -> io::Result<Box<dyn DeviceLink>> {
            self.board.lock().unwrap().connects += 1;
            Ok(Box::new(FakeLink {
                board: Arc::clone(&self.board),
                rx: VecDeque::new(),
            }))
        }
    }

    fn setup(bonded: bool) -> (tempfile::TempDir, Arc<Mutex<Board>>, Arc<SettingsStore>, ExternalDeviceEngine) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")).unwrap());
        settings
            .update(|prefs| {
                prefs.external_enabled = true;
                prefs.external_device = Some(ExternalDevice {
                    address: "/dev/rfcomm0".into(),
                    name: "board".into(),
                });
            })
            .unwrap();
        let board = Arc::new(Mutex::new(Board::default()));
        let connector = Arc::new(FakeConnector {
            board: Arc::clone(&board),
            bonded,
        });
        let engine = ExternalDeviceEngine::new(connector, Arc::clone(&settings));
        (dir, board, settings, engine)
    }

    fn push_data(board: &Arc<Mutex<Board>>, line: &str) {
        board.lock().unwrap().data.push_back(line.to_string());
    }

    #[test]
    fn header_then_data() {
        let (_dir, board, settings, engine) = setup(true);
        engine.shared.consumers.store(1, Ordering::SeqCst);
        let mut events = engine.subscribe();
        let mut poller = engine.poller();

        poller.step();
        assert_eq!(engine.state(), LinkState::HeaderPending);
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::Connected {
                kind: EngineKind::External
            }
        );

        poller.step();
        assert_eq!(engine.state(), LinkState::Streaming);
        assert_eq!(settings.external_header().as_deref(), Some(HEADER));
        let data = engine.data();
        assert_eq!(data[0].columns.len(), 2);
        assert!(events.try_recv().is_ok());

        push_data(&board, "21.5;40");
        poller.step();
        let reading = &engine.data()[0];
        assert_eq!(reading.value("t"), Some(&ColumnValue::Float(21.5)));
        assert_eq!(reading.value("h"), Some(&ColumnValue::Integer(40)));
        assert!(events.try_recv().is_ok());
        assert_eq!(board.lock().unwrap().sent, vec![CMD_HEADER, CMD_DATA]);
    }

    #[test]
    fn wrong_field_count_is_not_an_update() {
        let (_dir, board, _settings, engine) = setup(true);
        engine.shared.consumers.store(1, Ordering::SeqCst);
        let mut poller = engine.poller();
        poller.step();
        poller.step();
        push_data(&board, "21.5;40");
        poller.step();

        let mut events = engine.subscribe();
        push_data(&board, "22.0;41;7");
        poller.step();

        let reading = &engine.data()[0];
        assert_eq!(reading.value("t"), Some(&ColumnValue::Float(21.5)));
        assert_eq!(reading.value("h"), Some(&ColumnValue::Integer(40)));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn cached_header_skips_fetch_until_refreshed() {
        let (_dir, board, settings, _engine) = setup(true);
        settings.set_external_header(Some(HEADER.to_string())).unwrap();
        let connector = Arc::new(FakeConnector {
            board: Arc::clone(&board),
            bonded: true,
        });
        let engine = ExternalDeviceEngine::new(connector, Arc::clone(&settings));
        engine.shared.consumers.store(1, Ordering::SeqCst);
        assert_eq!(engine.data()[0].columns.len(), 2);

        let mut poller = engine.poller();
        poller.step();
        assert_eq!(engine.state(), LinkState::Streaming);
        push_data(&board, "1;2");
        poller.step();
        assert_eq!(board.lock().unwrap().sent, vec![CMD_DATA]);

        engine.refresh_header().unwrap();
        assert_eq!(settings.external_header(), None);
        poller.step();
        assert_eq!(board.lock().unwrap().sent, vec![CMD_DATA, CMD_HEADER]);
        assert_eq!(engine.state(), LinkState::Streaming);
        assert_eq!(settings.external_header().as_deref(), Some(HEADER));
    }

    #[test]
    fn io_failure_clears_values_and_retries_while_attached() {
        let (_dir, board, _settings, engine) = setup(true);
        engine.shared.consumers.store(1, Ordering::SeqCst);
        engine.shared.running.store(true, Ordering::SeqCst);
        let mut poller = engine.poller();
        poller.step();
        poller.step();
        push_data(&board, "21.5;40");
        poller.step();

        let mut events = engine.subscribe();
        board.lock().unwrap().fail_next = true;
        poller.step();

        assert_eq!(engine.state(), LinkState::Disconnected);
        assert!(engine.data()[0].columns.iter().all(|c| c.value.is_none()));
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::ConnectionLost {
                kind: EngineKind::External
            }
        );
        assert!(engine.shared.running.load(Ordering::SeqCst));

        poller.step();
        assert_eq!(board.lock().unwrap().connects, 2);
        assert_eq!(engine.state(), LinkState::Streaming);
    }

    #[test]
    fn failure_without_consumers_tears_down() {
        let (_dir, board, _settings, engine) = setup(true);
        engine.shared.running.store(true, Ordering::SeqCst);
        let mut poller = engine.poller();
        poller.step();
        engine.on_link_lost();
        poller.step();

        assert_eq!(engine.state(), LinkState::Disconnected);
        assert!(!engine.shared.running.load(Ordering::SeqCst));
        assert_eq!(board.lock().unwrap().connects, 1);
    }

    #[test]
    fn unanswered_command_is_resent_after_patience() {
        let (_dir, board, _settings, engine) = setup(true);
        board.lock().unwrap().silent = true;
        let mut poller = engine.poller();
        poller.step();
        for _ in 0..REPLY_PATIENCE_TICKS {
            poller.step();
        }
        assert_eq!(board.lock().unwrap().sent, vec![CMD_HEADER]);
        poller.step();
        assert_eq!(board.lock().unwrap().sent, vec![CMD_HEADER, CMD_HEADER]);
    }

    #[test]
    fn unbonded_device_stays_disconnected() {
        let (_dir, board, _settings, engine) = setup(false);
        let mut poller = engine.poller();
        poller.step();
        assert_eq!(engine.state(), LinkState::Disconnected);
        assert_eq!(board.lock().unwrap().connects, 0);
    }

    #[test]
    fn worker_streams_until_last_consumer_stops() {
        let (_dir, board, _settings, engine) = setup(true);
        for _ in 0..50 {
            push_data(&board, "20;30");
        }
        assert!(engine.is_enabled());
        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.consumers(), 2);

        thread::sleep(POLL_INTERVAL * 6);
        assert_eq!(engine.state(), LinkState::Streaming);
        assert_eq!(engine.data()[0].value("h"), Some(&ColumnValue::Integer(30)));

        engine.stop();
        assert!(engine.shared.running.load(Ordering::SeqCst));
        engine.stop();
        assert!(!engine.shared.running.load(Ordering::SeqCst));
        assert_eq!(engine.state(), LinkState::Disconnected);
    }
}
