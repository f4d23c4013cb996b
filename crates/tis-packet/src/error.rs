//! Error types for tis-packet.

use thiserror::Error;

use crate::Frame;

/// Reasons a raw datagram could not be accepted as a frame.
///
/// Every variant is a recoverable outcome: the transport is an open port and
/// malformed or foreign traffic is expected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// No `AA AA` start code anywhere in the input.
    #[error("no frame preamble found")]
    NoPreamble,

    /// Fewer bytes follow the preamble than a zero-payload frame needs.
    #[error("frame too short: {available} bytes after preamble (minimum 11)")]
    TooShort {
        /// Bytes available after the preamble.
        available: usize,
    },

    /// The length byte disagrees with the number of bytes received.
    #[error("length mismatch: length byte says {declared}, {available} bytes after preamble")]
    LengthMismatch {
        /// Value of the length byte.
        declared: usize,
        /// Bytes actually available after the preamble.
        available: usize,
    },

    /// The frame parsed but its checksum is wrong.
    ///
    /// The parsed fields are kept for diagnostics only; the payload must not be
    /// acted upon.
    #[error("checksum mismatch: received 0x{received:04X}, computed 0x{computed:04X}")]
    ChecksumMismatch {
        /// The frame as parsed, with the received checksum.
        frame: Box<Frame>,
        /// Checksum carried by the frame.
        received: u16,
        /// Checksum computed over the received bytes.
        computed: u16,
    },
}

impl DecodeError {
    /// Short stable label, suitable for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DecodeError::NoPreamble => "no_preamble",
            DecodeError::TooShort { .. } => "too_short",
            DecodeError::LengthMismatch { .. } => "length_mismatch",
            DecodeError::ChecksumMismatch { .. } => "checksum_mismatch",
        }
    }

    /// The parsed frame, if decoding got far enough to produce one.
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            DecodeError::ChecksumMismatch { frame, .. } => Some(frame),
            _ => None,
        }
    }
}

/// Errors that can occur when building frames.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Payload does not fit the one-byte length field.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum allowed payload size.
        max: usize,
    },

    /// Text could not be parsed as a subnet/device address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors raised when a payload does not have the shape its opcode requires.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// Payload shorter than the fields the opcode carries.
    #[error("payload for opcode 0x{opcode:04X} too short: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Opcode whose payload was being parsed.
        opcode: u16,
        /// Minimum size required.
        expected: usize,
        /// Size received.
        actual: usize,
    },

    /// A field holds a value outside its defined range.
    #[error("invalid value for opcode 0x{opcode:04X}: {message}")]
    InvalidValue {
        /// Opcode whose payload was being parsed.
        opcode: u16,
        /// Description of the problem.
        message: String,
    },
}

impl PayloadError {
    /// Create a truncation error.
    pub fn truncated(opcode: u16, expected: usize, actual: usize) -> Self {
        PayloadError::Truncated {
            opcode,
            expected,
            actual,
        }
    }

    /// Create an invalid-value error.
    pub fn invalid(opcode: u16, message: impl Into<String>) -> Self {
        PayloadError::InvalidValue {
            opcode,
            message: message.into(),
        }
    }
}
