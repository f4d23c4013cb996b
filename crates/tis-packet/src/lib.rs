//! TIS Building-Automation Frame Layer
//!
//! This crate provides the wire format used by TIS lighting, climate, curtain,
//! sensor and security devices. Every device on a bus or UDP broadcast domain
//! speaks the same envelope; meaning is carried by a 16-bit operation code.
//!
//! # Frame Overview
//!
//! ```text
//! +-------+-----+--------+--------+--------+--------+--------+--------+---------+-------+
//! | AA AA | len | src_sn | src_dv | kind:2 | op:2   | tgt_sn | tgt_dv | payload | crc:2 |
//! +-------+-----+--------+--------+--------+--------+--------+--------+---------+-------+
//! ```
//!
//! - `len` counts itself, the body and the checksum (`11 + payload.len()`)
//! - the checksum covers `len ++ body` and is transmitted big-endian
//! - target `255.255` addresses every listener
//!
//! # Example
//!
//! ```rust,ignore
//! use tis_packet::{decode_frame, Address, Identity};
//!
//! let me = Identity::new(Address::new(1, 254), 0xFFFE);
//! let bytes = me.discovery().encode()?;
//!
//! let frame = decode_frame(&bytes)?;
//! assert_eq!(frame.opcode, tis_packet::opcodes::DISCOVERY_REQUEST);
//! ```

mod checksum;
mod constants;
mod device;
mod envelope;
mod error;
mod frame;
mod message;
pub mod opcodes;
pub mod payload;
mod stream;

pub use checksum::*;
pub use constants::*;
pub use device::*;
pub use envelope::*;
pub use error::*;
pub use frame::*;
pub use message::*;
pub use stream::*;
