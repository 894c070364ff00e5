pub mod codec;
mod codec_proptest;
pub mod error;
pub mod hal;
pub mod reading;
pub mod serializer;
#[cfg(feature = "simulation")]
pub mod sim;

pub use codec::{exchange, FrameLimits, FrameScanner, LinkExchanger};
pub use error::{ErrorKind, ProtocolViolation, ScaleError};
pub use hal::{ByteChannel, Connector};
pub use reading::{ExchangeOutcome, WeightReading};
pub use serializer::{
    AccessSerializer, Exchanger, ReadingTicket, ScaleHandle, SerializerConfig, SerializerStats,
};
#[cfg(feature = "simulation")]
pub use sim::{SimulatedConnector, SimulatedLoad, SimulatedScale};
