use std::io;

/// Bidirectional byte link to the scale, opened for a single exchange.
///
/// Reads are expected to honour a per-operation timeout and report it as
/// `io::ErrorKind::TimedOut`.
pub trait ByteChannel {
    /// Drop anything buffered in either direction.
    fn discard_input(&mut self) -> io::Result<()>;
    /// Write `bytes`, returning how many were accepted.
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<usize>;
    fn read_byte(&mut self) -> io::Result<u8>;
}

/// Source of fresh connections. The channel is released when dropped.
pub trait Connector: Send {
    type Channel: ByteChannel;

    fn open(&mut self) -> io::Result<Self::Channel>;
    fn describe(&self) -> String;
}
