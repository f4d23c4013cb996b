//! Engine error types.

use std::io;

use thiserror::Error;
use tis_packet::{Address, PacketError};

/// Errors surfaced to callers of the engine.
///
/// Decode failures and handler failures are not here: they are recovered
/// inside the receive loop and reported as events.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transport refused to send.
    #[error("send failed: {0}")]
    SendFailure(#[source] io::Error),

    /// The transport will deliver no more datagrams.
    #[error("transport closed")]
    TransportClosed,

    /// No reply matched a correlated request within its attempt budget.
    #[error("no reply to opcode 0x{opcode:04X} from {target} after {attempts} attempt(s)")]
    CorrelationTimeout {
        /// Request opcode.
        opcode: u16,
        /// Request target.
        target: Address,
        /// Sends made before giving up.
        attempts: u32,
    },

    /// The caller's stop signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] PacketError),

    /// A spawned driver task panicked or was aborted.
    #[error("driver task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::CorrelationTimeout {
            opcode: 0x0031,
            target: Address::new(1, 10),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "no reply to opcode 0x0031 from 1.10 after 3 attempt(s)"
        );

        let err: EngineError = PacketError::PayloadTooLarge { size: 300, max: 244 }.into();
        assert!(err.to_string().contains("300"));
    }
}
