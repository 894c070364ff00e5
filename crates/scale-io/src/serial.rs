use scale_core::{ByteChannel, Connector};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM1";
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port_name: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Opens the configured port (8N1, no flow control) for every exchange.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    settings: SerialSettings,
}

impl SerialConnector {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }
}

impl Connector for SerialConnector {
    type Channel = SerialChannel;

    fn open(&mut self) -> io::Result<SerialChannel> {
        let port = serialport::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.settings.read_timeout)
            .open()
            .map_err(|e| {
                io::Error::new(
                    io_kind(&e),
                    format!(
                        "cannot open {}: {} (available ports: {})",
                        self.settings.port_name,
                        e,
                        port_list(&available_ports())
                    ),
                )
            })?;
        debug!(port = %self.settings.port_name, baud = self.settings.baud_rate, "Serial port opened");
        Ok(SerialChannel { port })
    }

    fn describe(&self) -> String {
        format!(
            "serial port {} @ {} baud",
            self.settings.port_name, self.settings.baud_rate
        )
    }
}

fn io_kind(err: &serialport::Error) -> io::ErrorKind {
    match err.kind() {
        serialport::ErrorKind::NoDevice => io::ErrorKind::NotFound,
        serialport::ErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
        serialport::ErrorKind::Io(kind) => kind,
        serialport::ErrorKind::Unknown => io::ErrorKind::Other,
    }
}

/// An open port; closed when dropped.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl ByteChannel for SerialChannel {
    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::All).map_err(io::Error::from)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let written = self.port.write(bytes)?;
        self.port.flush()?;
        Ok(written)
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf)? {
            0 => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no data before read timeout",
            )),
            _ => Ok(buf[0]),
        }
    }
}

/// Names of the serial ports the OS reports. Listed when opening fails.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            debug!(error = %e, "Cannot enumerate serial ports");
            Vec::new()
        }
    }
}

fn port_list(ports: &[String]) -> String {
    if ports.is_empty() {
        "none found".to_string()
    } else {
        ports.join(", ")
    }
}
