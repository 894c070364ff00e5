use thiserror::Error;

/// Coarse classification of a failed reading, for callers that only branch on
/// the kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Protocol,
    Format,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("unexpected acknowledge byte {received:#04X}, expected ACK (0x06)")]
    UnexpectedAcknowledge { received: u8 },
    #[error("frame start (STX) not found within {scanned} bytes")]
    FrameStartNotFound { scanned: usize },
    #[error("frame end (ETX) not found within {scanned} bytes")]
    FrameEndNotFound { scanned: usize },
}

/// Failure of one attempt to obtain a reading.
///
/// Cloneable so the access serializer can hand the same cached outcome to
/// several callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScaleError {
    #[error("{stage}: {message}")]
    Io {
        stage: &'static str,
        message: String,
        timed_out: bool,
    },
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("cannot parse {field}: {reason}")]
    Format { field: &'static str, reason: String },
    #[error("scale access closed")]
    Closed,
}

impl ScaleError {
    pub fn io(stage: &'static str, err: &std::io::Error) -> Self {
        let timed_out = matches!(
            err.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        );
        Self::Io {
            stage,
            message: err.to_string(),
            timed_out,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Format { .. } => ErrorKind::Format,
            Self::Closed => ErrorKind::Closed,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Io { timed_out: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn timed_out_reads_are_flagged() {
        let err = ScaleError::io("read ACK", &io::Error::new(io::ErrorKind::TimedOut, "timeout"));
        assert!(err.is_timeout());
        assert_eq!(err.kind(), ErrorKind::Io);

        let err = ScaleError::io("write ENQ", &io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(!err.is_timeout());
    }

    #[test]
    fn protocol_message_names_the_byte() {
        let err = ScaleError::from(ProtocolViolation::UnexpectedAcknowledge { received: 0x15 });
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("0x15"));
    }
}
