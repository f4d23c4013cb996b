//! Gateway envelope
//!
//! IP gateways prefix each frame with the sender's IPv4 address and the ASCII
//! tag `SMARTCLOUD`:
//!
//! ```text
//! +---------+------------+-------+-----
//! | ipv4:4  | SMARTCLOUD | AA AA | ...
//! +---------+------------+-------+-----
//! ```

use std::net::Ipv4Addr;

use crate::{ENVELOPE_LEN, ENVELOPE_TAG, PREAMBLE};

/// Prefix `frame` with a gateway envelope naming `origin`.
pub fn wrap_envelope(origin: Ipv4Addr, frame: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ENVELOPE_LEN + frame.len());
    buf.extend_from_slice(&origin.octets());
    buf.extend_from_slice(ENVELOPE_TAG);
    buf.extend_from_slice(frame);
    buf
}

/// True if `data` starts with a gateway envelope.
pub fn has_envelope(data: &[u8]) -> bool {
    !data.starts_with(&PREAMBLE)
        && data.len() >= ENVELOPE_LEN
        && &data[4..ENVELOPE_LEN] == ENVELOPE_TAG
}

/// Origin address carried by a gateway envelope, if present.
pub fn envelope_origin(data: &[u8]) -> Option<Ipv4Addr> {
    if has_envelope(data) {
        Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
    } else {
        None
    }
}

/// Return `data` with a leading gateway envelope removed.
///
/// Input without an envelope is returned unchanged.
pub fn strip_envelope(data: &[u8]) -> &[u8] {
    if has_envelope(data) {
        &data[ENVELOPE_LEN..]
    } else {
        data
    }
}
