//! Wire constants
//!
//! Fixed sizes and sentinels of the TIS frame layout.

/// Two-byte start code that begins every frame.
pub const PREAMBLE: [u8; 2] = [0xAA, 0xAA];

/// Size of the body header: source address (2), source kind (2), opcode (2),
/// target address (2).
pub const HEADER_LEN: usize = 8;

/// Size of the trailing checksum.
pub const CHECKSUM_LEN: usize = 2;

/// Smallest legal value of the length byte (no payload): `1 + 8 + 2`.
pub const MIN_FRAME_LENGTH: usize = 1 + HEADER_LEN + CHECKSUM_LEN;

/// Largest legal value of the length byte.
pub const MAX_FRAME_LENGTH: usize = u8::MAX as usize;

/// Largest payload that still fits the one-byte length field.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LENGTH - MIN_FRAME_LENGTH;

/// Subnet and device value addressing every listener.
pub const BROADCAST_ID: u8 = 0xFF;

/// Default UDP port used by TIS gateways and devices.
pub const DEFAULT_UDP_PORT: u16 = 6000;

/// ASCII tag that gateways place after the sender IPv4 address.
pub const ENVELOPE_TAG: &[u8; 10] = b"SMARTCLOUD";

/// Size of a full gateway envelope (IPv4 address + tag).
pub const ENVELOPE_LEN: usize = 4 + ENVELOPE_TAG.len();

/// Device kind used by controllers that are not a physical module.
pub const CONTROLLER_KIND: u16 = 0xFFFE;
