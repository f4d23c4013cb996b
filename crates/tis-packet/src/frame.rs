//! Frame encoding and decoding.
//!
//! ## Frame Format
//!
//! | Field       | Size (bytes) | Description                                         |
//! |-------------|--------------|-----------------------------------------------------|
//! | preamble    | 2            | Always `AA AA`.                                     |
//! | length      | 1            | `11 + payload.len()`; bytes remaining after preamble |
//! | source      | 2            | Sender subnet and device.                           |
//! | source_kind | 2            | Sender device type, informational only.             |
//! | opcode      | 2            | Meaning of the frame.                               |
//! | target      | 2            | Target subnet and device; `255.255` is broadcast.   |
//! | payload     | length - 11  | Opcode specific.                                    |
//! | checksum    | 2            | CRC over `length ++ body`.                          |
//!
//! All multi-byte fields are big-endian.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    checksum, strip_envelope, DecodeError, PacketError, BROADCAST_ID, CHECKSUM_LEN, HEADER_LEN,
    MAX_PAYLOAD_LEN, MIN_FRAME_LENGTH, PREAMBLE,
};

// ============================================================================
// Address
// ============================================================================

/// Logical `(subnet, device)` address of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    /// Subnet id.
    pub subnet: u8,
    /// Device id within the subnet.
    pub device: u8,
}

impl Address {
    /// Address every listener accepts.
    pub const BROADCAST: Address = Address {
        subnet: BROADCAST_ID,
        device: BROADCAST_ID,
    };

    /// Create a new address.
    pub const fn new(subnet: u8, device: u8) -> Self {
        Address { subnet, device }
    }

    /// True for `255.255`.
    pub fn is_broadcast(&self) -> bool {
        self.subnet == BROADCAST_ID && self.device == BROADCAST_ID
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.subnet, self.device)
    }
}

impl FromStr for Address {
    type Err = PacketError;

    /// Parse `subnet.device`, e.g. `1.254`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (subnet, device) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| PacketError::InvalidAddress(s.to_string()))?;
        let subnet = subnet
            .parse::<u8>()
            .map_err(|_| PacketError::InvalidAddress(s.to_string()))?;
        let device = device
            .parse::<u8>()
            .map_err(|_| PacketError::InvalidAddress(s.to_string()))?;
        Ok(Address { subnet, device })
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A fully parsed frame as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Value of the length byte.
    pub length: u8,
    /// Sender address.
    pub source: Address,
    /// Sender device type.
    pub source_kind: u16,
    /// Operation code.
    pub opcode: u16,
    /// Target address.
    pub target: Address,
    /// Opcode-specific payload.
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    /// Checksum carried by the frame.
    pub checksum: u16,
}

impl Frame {
    /// True if the frame is addressed to every listener.
    pub fn is_broadcast(&self) -> bool {
        self.target.is_broadcast()
    }

    /// True if a listener at `address` should accept this frame.
    pub fn is_for(&self, address: Address) -> bool {
        self.is_broadcast() || self.target == address
    }

    /// Re-encode the frame exactly as received.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PREAMBLE.len() + self.length as usize);
        buf.extend_from_slice(&PREAMBLE);
        buf.push(self.length);
        push_body(
            &mut buf,
            self.source,
            self.source_kind,
            self.opcode,
            self.target,
            &self.payload,
        );
        buf.extend_from_slice(&self.checksum.to_be_bytes());
        buf
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn push_body(
    buf: &mut Vec<u8>,
    source: Address,
    source_kind: u16,
    opcode: u16,
    target: Address,
    payload: &[u8],
) {
    buf.push(source.subnet);
    buf.push(source.device);
    buf.extend_from_slice(&source_kind.to_be_bytes());
    buf.extend_from_slice(&opcode.to_be_bytes());
    buf.push(target.subnet);
    buf.push(target.device);
    buf.extend_from_slice(payload);
}

/// Encode a frame to bytes, preamble through checksum.
pub fn encode_frame(
    source: Address,
    source_kind: u16,
    opcode: u16,
    target: Address,
    payload: &[u8],
) -> Result<Vec<u8>, PacketError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(PacketError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let length = MIN_FRAME_LENGTH + payload.len();
    let mut buf = Vec::with_capacity(PREAMBLE.len() + length);

    // 1. Preamble
    buf.extend_from_slice(&PREAMBLE);

    // 2. Length byte
    buf.push(length as u8);

    // 3. Body
    push_body(&mut buf, source, source_kind, opcode, target, payload);

    // 4. Checksum over length ++ body
    let crc = checksum(&buf[PREAMBLE.len()..]);
    buf.extend_from_slice(&crc.to_be_bytes());

    Ok(buf)
}

// ============================================================================
// Decoding
// ============================================================================

/// Find the offset of the first preamble in `data`.
pub fn find_preamble(data: &[u8]) -> Option<usize> {
    data.windows(PREAMBLE.len()).position(|w| w == PREAMBLE)
}

/// Decode a single frame from a datagram.
///
/// A gateway envelope is skipped if present, then the first preamble is
/// located. The length byte must account for exactly the bytes that follow
/// the preamble; trailing garbage or truncation is rejected.
pub fn decode_frame(data: &[u8]) -> Result<Frame, DecodeError> {
    let data = strip_envelope(data);

    // 1. Preamble
    let start = find_preamble(data).ok_or(DecodeError::NoPreamble)?;
    let rest = &data[start + PREAMBLE.len()..];

    // 2. Minimum size
    if rest.len() < MIN_FRAME_LENGTH {
        return Err(DecodeError::TooShort {
            available: rest.len(),
        });
    }

    // 3. Length byte
    let declared = rest[0] as usize;
    if declared != rest.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            available: rest.len(),
        });
    }

    // 4. Fields
    let crc_at = declared - CHECKSUM_LEN;
    let received = u16::from_be_bytes([rest[crc_at], rest[crc_at + 1]]);
    let frame = Frame {
        length: rest[0],
        source: Address::new(rest[1], rest[2]),
        source_kind: u16::from_be_bytes([rest[3], rest[4]]),
        opcode: u16::from_be_bytes([rest[5], rest[6]]),
        target: Address::new(rest[7], rest[8]),
        payload: rest[1 + HEADER_LEN..crc_at].to_vec(),
        checksum: received,
    };

    // 5. Checksum
    let computed = checksum(&rest[..crc_at]);
    if computed != received {
        return Err(DecodeError::ChecksumMismatch {
            frame: Box::new(frame),
            received,
            computed,
        });
    }

    Ok(frame)
}
