use crate::codec::{encode_frame, ACK, DC1, ENQ};
use crate::hal::{ByteChannel, Connector};
use crate::reading::WeightReading;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Reading presented by simulated scales; shared so it can be changed while
/// the bridge is running.
#[derive(Debug, Default)]
pub struct SimulatedLoad {
    weight_bits: AtomicU64,
    unstable: AtomicBool,
}

impl SimulatedLoad {
    pub fn new(reading: WeightReading) -> Arc<Self> {
        let load = Arc::new(Self::default());
        load.set(reading);
        load
    }

    pub fn set(&self, reading: WeightReading) {
        self.weight_bits
            .store(reading.weight.to_bits(), Ordering::Relaxed);
        self.unstable.store(reading.unstable, Ordering::Relaxed);
    }

    pub fn get(&self) -> WeightReading {
        WeightReading {
            weight: f64::from_bits(self.weight_bits.load(Ordering::Relaxed)),
            unstable: self.unstable.load(Ordering::Relaxed),
        }
    }
}

/// In-memory indicator speaking the ENQ/ACK/DC1 protocol.
#[derive(Debug)]
pub struct SimulatedScale {
    load: Arc<SimulatedLoad>,
    preamble: Vec<u8>,
    outbound: VecDeque<u8>,
}

impl SimulatedScale {
    pub fn new(load: Arc<SimulatedLoad>) -> Self {
        Self {
            load,
            preamble: Vec::new(),
            outbound: VecDeque::new(),
        }
    }

    /// Bytes sent ahead of every frame, as some indicators emit line noise.
    pub fn with_preamble(mut self, preamble: &[u8]) -> Self {
        self.preamble = preamble.to_vec();
        self
    }

    fn answer(&mut self, byte: u8) {
        match byte {
            ENQ => self.outbound.push_back(ACK),
            DC1 => {
                self.outbound.extend(self.preamble.iter().copied());
                // a reading too wide for the display yields no frame, like an
                // overloaded indicator
                if let Some(frame) = encode_frame(self.load.get()) {
                    self.outbound.extend(frame);
                }
            }
            _ => {}
        }
    }
}

impl ByteChannel for SimulatedScale {
    fn discard_input(&mut self) -> io::Result<()> {
        self.outbound.clear();
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<usize> {
        for &byte in bytes {
            self.answer(byte);
        }
        Ok(bytes.len())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        self.outbound
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "simulated scale is silent"))
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    load: Arc<SimulatedLoad>,
    preamble: Vec<u8>,
}

impl SimulatedConnector {
    pub fn new(load: Arc<SimulatedLoad>) -> Self {
        Self {
            load,
            preamble: Vec::new(),
        }
    }

    pub fn with_preamble(mut self, preamble: &[u8]) -> Self {
        self.preamble = preamble.to_vec();
        self
    }

    pub fn load(&self) -> Arc<SimulatedLoad> {
        Arc::clone(&self.load)
    }
}

impl Connector for SimulatedConnector {
    type Channel = SimulatedScale;

    fn open(&mut self) -> io::Result<SimulatedScale> {
        Ok(SimulatedScale::new(Arc::clone(&self.load)).with_preamble(&self.preamble))
    }

    fn describe(&self) -> String {
        "simulated scale".to_string()
    }
}
