//! ENQ/ACK/DC1 request-response codec for CAS AD-family indicators.
//!
//! One exchange is: discard stale input, send ENQ, expect ACK, send DC1, then
//! scan the reply for an STX..ETX frame. The frame body carries a stability
//! flag at byte 0 and a six character ASCII weight at bytes 2..8.
//!
//! The protocol has no length header, so both the preamble scan and the body
//! scan run on a fixed byte budget. Exhausting a budget fails the exchange,
//! never the process.

use crate::error::{ProtocolViolation, ScaleError};
use crate::hal::{ByteChannel, Connector};
use crate::reading::{ExchangeOutcome, WeightReading};
use crate::serializer::Exchanger;
use log::{debug, trace};
use std::ops::Range;

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ENQ: u8 = 0x05;
pub const ACK: u8 = 0x06;
pub const DC1: u8 = 0x11;

/// `S`: the indicator has settled.
pub const STABLE: u8 = 0x53;
/// `U`: the load is still moving.
pub const UNSTABLE: u8 = 0x55;

pub const WEIGHT_FIELD: Range<usize> = 2..8;
const WEIGHT_WIDTH: usize = WEIGHT_FIELD.end - WEIGHT_FIELD.start;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Bytes read while looking for STX.
    pub preamble: usize,
    /// Bytes read after STX while looking for ETX, the ETX included.
    pub body: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            preamble: 25,
            body: 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    SeekStart { scanned: usize },
    ReadBody { scanned: usize },
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    NeedMore,
    Complete,
}

/// Byte-at-a-time frame acquisition: `SeekStart -> ReadBody -> Done`.
#[derive(Debug, Clone)]
pub struct FrameScanner {
    limits: FrameLimits,
    state: ScanState,
    body: Vec<u8>,
}

impl FrameScanner {
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            limits,
            state: ScanState::SeekStart { scanned: 0 },
            body: Vec::with_capacity(limits.body),
        }
    }

    pub fn push(&mut self, byte: u8) -> Result<ScanStep, ProtocolViolation> {
        match self.state {
            ScanState::SeekStart { scanned } => {
                let scanned = scanned + 1;
                if byte == STX {
                    self.state = ScanState::ReadBody { scanned: 0 };
                    return Ok(ScanStep::NeedMore);
                }
                if scanned >= self.limits.preamble {
                    return Err(ProtocolViolation::FrameStartNotFound { scanned });
                }
                self.state = ScanState::SeekStart { scanned };
                Ok(ScanStep::NeedMore)
            }
            ScanState::ReadBody { scanned } => {
                let scanned = scanned + 1;
                if byte == ETX {
                    self.state = ScanState::Done;
                    return Ok(ScanStep::Complete);
                }
                if scanned >= self.limits.body {
                    return Err(ProtocolViolation::FrameEndNotFound { scanned });
                }
                self.body.push(byte);
                self.state = ScanState::ReadBody { scanned };
                Ok(ScanStep::NeedMore)
            }
            ScanState::Done => Ok(ScanStep::Complete),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ScanState::Done
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Decode a frame body (the bytes between STX and ETX).
pub fn parse_frame_body(body: &[u8]) -> Result<WeightReading, ScaleError> {
    if body.len() < WEIGHT_FIELD.end {
        return Err(ScaleError::Format {
            field: "weight",
            reason: format!(
                "frame body of {} bytes ends before the weight field",
                body.len()
            ),
        });
    }

    let field = std::str::from_utf8(&body[WEIGHT_FIELD]).map_err(|e| ScaleError::Format {
        field: "weight",
        reason: e.to_string(),
    })?;
    let weight: f64 = field
        .trim_start_matches(' ')
        .parse()
        .map_err(|e: std::num::ParseFloatError| ScaleError::Format {
            field: "weight",
            reason: format!("{field:?}: {e}"),
        })?;
    if !weight.is_finite() {
        return Err(ScaleError::Format {
            field: "weight",
            reason: format!("{field:?} is not a finite number"),
        });
    }

    Ok(WeightReading {
        weight,
        unstable: body[0] != STABLE,
    })
}

/// Render `weight` into the six byte field, right aligned, keeping as many
/// of two decimals as fit. `None` when even the integer part does not fit.
pub fn encode_weight_field(weight: f64) -> Option<[u8; WEIGHT_WIDTH]> {
    if !weight.is_finite() {
        return None;
    }
    (0..=2).rev().find_map(|decimals| {
        let text = format!("{:>width$.prec$}", weight, width = WEIGHT_WIDTH, prec = decimals);
        text.as_bytes().try_into().ok()
    })
}

/// Full STX..ETX frame as the indicator sends it, with a `kg` unit trailer.
pub fn encode_frame(reading: WeightReading) -> Option<Vec<u8>> {
    let field = encode_weight_field(reading.weight)?;
    let flag = if reading.unstable { UNSTABLE } else { STABLE };
    let mut frame = Vec::with_capacity(WEIGHT_FIELD.end + 4);
    frame.push(STX);
    frame.push(flag);
    frame.push(b' ');
    frame.extend_from_slice(&field);
    frame.extend_from_slice(b"kg");
    frame.push(ETX);
    Some(frame)
}

fn send_control<C: ByteChannel + ?Sized>(
    channel: &mut C,
    code: u8,
    stage: &'static str,
) -> Result<(), ScaleError> {
    let written = channel
        .write_bytes(&[code])
        .map_err(|e| ScaleError::io(stage, &e))?;
    if written != 1 {
        return Err(ScaleError::Io {
            stage,
            message: format!("short write: {written} of 1 bytes sent"),
            timed_out: false,
        });
    }
    Ok(())
}

pub fn read_frame<C: ByteChannel + ?Sized>(
    channel: &mut C,
    limits: FrameLimits,
) -> Result<Vec<u8>, ScaleError> {
    let mut scanner = FrameScanner::new(limits);
    loop {
        let byte = channel
            .read_byte()
            .map_err(|e| ScaleError::io("read frame", &e))?;
        if scanner.push(byte)? == ScanStep::Complete {
            return Ok(scanner.into_body());
        }
    }
}

/// Run one request/response cycle on an open channel.
pub fn exchange<C: ByteChannel + ?Sized>(channel: &mut C, limits: FrameLimits) -> ExchangeOutcome {
    channel
        .discard_input()
        .map_err(|e| ScaleError::io("discard input", &e))?;

    send_control(channel, ENQ, "write ENQ")?;

    let ack = channel
        .read_byte()
        .map_err(|e| ScaleError::io("read ACK", &e))?;
    if ack != ACK {
        return Err(ProtocolViolation::UnexpectedAcknowledge { received: ack }.into());
    }

    send_control(channel, DC1, "write DC1")?;

    let body = read_frame(channel, limits)?;
    trace!("frame body: {:02X?}", body);
    parse_frame_body(&body)
}

/// Opens a fresh connection per exchange and runs the codec over it.
pub struct LinkExchanger<C: Connector> {
    connector: C,
    limits: FrameLimits,
}

impl<C: Connector> LinkExchanger<C> {
    pub fn new(connector: C) -> Self {
        Self::with_limits(connector, FrameLimits::default())
    }

    pub fn with_limits(connector: C, limits: FrameLimits) -> Self {
        Self { connector, limits }
    }
}

impl<C: Connector + 'static> Exchanger for LinkExchanger<C> {
    fn exchange(&mut self) -> ExchangeOutcome {
        debug!("opening {}", self.connector.describe());
        let mut channel = self
            .connector
            .open()
            .map_err(|e| ScaleError::io("open port", &e))?;
        exchange(&mut channel, self.limits)
    }
}
