//! Transport to the external board.

use std::io;
use std::path::Path;
use std::time::Duration;

use serial2::SerialPort;

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Short timeout so a read behaves like "take what is available".
const POLL_READ_TIMEOUT: Duration = Duration::from_millis(20);

/// An open byte stream to the board.
pub trait DeviceLink: Send {
    fn send(&mut self, command: u8) -> io::Result<()>;

    /// Copies whatever bytes are ready into `buf` without waiting for more.
    /// `Ok(0)` means nothing was available.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens links to a paired device.
pub trait DeviceConnector: Send + Sync {
    fn adapter_enabled(&self) -> bool;

    fn is_bonded(&self, address: &str) -> bool;

    fn connect(&self, address: &str) -> io::Result<Box<dyn DeviceLink>>;
}

/// Serial-port link (an RFCOMM tty or a USB serial adapter).
pub struct SerialLink {
    port: SerialPort,
}

impl SerialLink {
    pub fn open(path: &str, baud_rate: u32) -> io::Result<Self> {
        let mut port = SerialPort::open(path, baud_rate)?;
        port.set_read_timeout(POLL_READ_TIMEOUT)?;
        Ok(Self { port })
    }
}

impl DeviceLink for SerialLink {
    fn send(&mut self, command: u8) -> io::Result<()> {
        self.port.write_all(&[command])
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(read) => Ok(read),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }
}

/// Treats the device address as a serial port path; "bonded" means the
/// port node exists.
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl DeviceConnector for SerialConnector {
    fn adapter_enabled(&self) -> bool {
        true
    }

    fn is_bonded(&self, address: &str) -> bool {
        Path::new(address).exists()
    }

    fn connect(&self, address: &str) -> io::Result<Box<dyn DeviceLink>> {
        Ok(Box::new(SerialLink::open(address, self.baud_rate)?))
    }
}

/// Lists serial ports the host can see.
pub fn available_ports() -> io::Result<Vec<String>> {
    Ok(SerialPort::available_ports()?
        .into_iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect())
}
