//! Transport layer error types.
//!
//! Every error here ends the channel it occurred on. Nothing is retried
//! inside the channel; the owner decides whether to reconnect.

use std::io;

use thiserror::Error;

use super::frame::FrameError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame parsing or encoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the stream cleanly between two messages.
    #[error("connection closed")]
    ConnectionClosed,

    /// Stream ended in the middle of a header or payload.
    #[error("unexpected end of stream: {received} of {expected} bytes")]
    UnexpectedEof {
        /// Bytes the current message still required in total.
        expected: u64,
        /// Bytes received before the stream ended.
        received: u64,
    },
}

impl TransportError {
    /// Whether the peer simply hung up at a message boundary.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, TransportError::ConnectionClosed)
    }

    /// Whether the stream carried bytes that do not form a valid message.
    pub fn is_decode_fault(&self) -> bool {
        matches!(
            self,
            TransportError::Frame(_) | TransportError::UnexpectedEof { .. }
        )
    }

    /// Whether this is a refused, reset or aborted connection.
    ///
    /// These are the faults a peer answers with a delayed reconnect.
    pub fn is_connection_fault(&self) -> bool {
        match self {
            TransportError::Io(e) => is_connection_fault(e),
            TransportError::ConnectionClosed => true,
            _ => false,
        }
    }
}

/// Whether an I/O error is a refused, reset or aborted connection.
pub fn is_connection_fault(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_close() {
        assert!(TransportError::ConnectionClosed.is_clean_close());
        assert!(
            !TransportError::UnexpectedEof {
                expected: 10,
                received: 3
            }
            .is_clean_close()
        );
    }

    #[test]
    fn test_decode_faults() {
        assert!(TransportError::Frame(FrameError::NotAnObject).is_decode_fault());
        assert!(
            TransportError::UnexpectedEof {
                expected: 10,
                received: 3
            }
            .is_decode_fault()
        );
        assert!(!TransportError::ConnectionClosed.is_decode_fault());
    }

    #[test]
    fn test_connection_faults() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
        ] {
            assert!(TransportError::Io(io::Error::new(kind, "test")).is_connection_fault());
        }
        assert!(
            !TransportError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "test"))
                .is_connection_fault()
        );
        assert!(!TransportError::Frame(FrameError::MissingAction).is_connection_fault());
    }
}
