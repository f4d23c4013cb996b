//! Stream reassembly.
//!
//! On a serial bus frames arrive as an unframed byte stream: chunks may split
//! a frame, carry several frames, or contain line noise. [`FrameStream`]
//! buffers the stream and cuts it at preamble and length boundaries.
//!
//! ```text
//! noise | AA AA len ... crc | AA AA len ... crc | AA AA le
//!         \______ 1 ______/   \______ 2 ______/   partial, kept
//! ```

use bytes::{Buf, BytesMut};

use crate::{decode_frame, DecodeError, Frame, MAX_FRAME_LENGTH, MIN_FRAME_LENGTH, PREAMBLE};

/// Initial buffer capacity.
const INITIAL_CAPACITY: usize = 2 * (PREAMBLE.len() + MAX_FRAME_LENGTH);

/// Accumulates raw bytes and yields one decode outcome per frame boundary.
#[derive(Debug)]
pub struct FrameStream {
    buffer: BytesMut,
}

impl Default for FrameStream {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        FrameStream {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Add received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to cut the next frame from the buffer.
    ///
    /// Returns `None` if more data is needed. A candidate whose checksum
    /// fails is treated as noise if another preamble starts inside it, and
    /// the scan resumes one byte on. Otherwise it is consumed and returned
    /// as an error so the stream moves on.
    pub fn next_frame(&mut self) -> Option<Result<Frame, DecodeError>> {
        loop {
            self.skip_noise();

            // Preamble + length byte
            if self.buffer.len() < PREAMBLE.len() + 1 {
                return None;
            }

            let length = self.buffer[PREAMBLE.len()] as usize;
            if length < MIN_FRAME_LENGTH {
                // Not a real frame start; resync one byte further on.
                self.buffer.advance(1);
                continue;
            }

            let total = PREAMBLE.len() + length;
            if self.buffer.len() < total {
                return None;
            }

            let candidate = decode_frame(&self.buffer[..total]);
            if candidate.is_err() && self.preamble_within(total) {
                self.buffer.advance(1);
                continue;
            }
            self.buffer.advance(total);
            return Some(candidate);
        }
    }

    /// Drain every complete frame currently buffered.
    pub fn drain(&mut self) -> Vec<Result<Frame, DecodeError>> {
        let mut out = Vec::new();
        while let Some(result) = self.next_frame() {
            out.push(result);
        }
        out
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Whether a preamble starts after the first byte of `buffer[..end]`.
    fn preamble_within(&self, end: usize) -> bool {
        self.buffer[1..end]
            .windows(PREAMBLE.len())
            .any(|w| w == PREAMBLE)
    }

    /// Drop bytes before the first preamble, keeping a trailing `AA` that may
    /// be the first half of one.
    fn skip_noise(&mut self) {
        let found = self
            .buffer
            .windows(PREAMBLE.len())
            .position(|w| w == PREAMBLE);
        match found {
            Some(0) => {}
            Some(pos) => self.buffer.advance(pos),
            None => {
                let keep = usize::from(self.buffer.last() == Some(&PREAMBLE[0]));
                let drop = self.buffer.len() - keep;
                self.buffer.advance(drop);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISCOVERY: &str = "aaaa0b01fefffef003ffff212b";
    const STATUS: &str = "aaaa0f010a0258003401fe03640032dc3b";

    #[test]
    fn test_stream_single_frame() {
        let mut stream = FrameStream::new();
        stream.push(&hex::decode(DISCOVERY).unwrap());
        let frame = stream.next_frame().unwrap().unwrap();
        assert_eq!(frame.opcode, 0xF003);
        assert!(stream.next_frame().is_none());
        assert_eq!(stream.buffered_len(), 0);
    }

    #[test]
    fn test_stream_partial() {
        let bytes = hex::decode(STATUS).unwrap();
        let mut stream = FrameStream::new();

        stream.push(&bytes[..5]);
        assert!(stream.next_frame().is_none());
        assert_eq!(stream.buffered_len(), 5);

        stream.push(&bytes[5..]);
        let frame = stream.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload, vec![3, 100, 0, 50]);
    }

    #[test]
    fn test_stream_concatenated_with_noise() {
        let mut data = vec![0x00, 0x13, 0x55];
        data.extend(hex::decode(DISCOVERY).unwrap());
        data.extend([0x42, 0x42]);
        data.extend(hex::decode(STATUS).unwrap());

        let mut stream = FrameStream::new();
        stream.push(&data);
        let frames = stream.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap().opcode, 0xF003);
        assert_eq!(frames[1].as_ref().unwrap().opcode, 0x0034);
    }

    #[test]
    fn test_stream_bad_checksum_consumed() {
        let mut bad = hex::decode(DISCOVERY).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;

        let mut stream = FrameStream::new();
        stream.push(&bad);
        stream.push(&hex::decode(STATUS).unwrap());

        let first = stream.next_frame().unwrap();
        assert!(matches!(first, Err(DecodeError::ChecksumMismatch { .. })));
        let second = stream.next_frame().unwrap().unwrap();
        assert_eq!(second.opcode, 0x0034);
    }

    #[test]
    fn test_stream_resync_on_bad_length() {
        let mut data = vec![0xAA, 0xAA, 0x03];
        data.extend(hex::decode(DISCOVERY).unwrap());

        let mut stream = FrameStream::new();
        stream.push(&data);
        let frame = stream.next_frame().unwrap().unwrap();
        assert_eq!(frame.opcode, 0xF003);
    }

    #[test]
    fn test_stream_false_start_does_not_swallow_frames() {
        let mut data = vec![0xAA, 0xAA, 0x0F];
        data.extend(hex::decode(DISCOVERY).unwrap());
        data.extend(hex::decode(STATUS).unwrap());

        let mut stream = FrameStream::new();
        stream.push(&data);
        let opcodes: Vec<u16> = stream
            .drain()
            .into_iter()
            .map(|result| result.unwrap().opcode)
            .collect();
        assert_eq!(opcodes, vec![0xF003, 0x0034]);
        assert_eq!(stream.buffered_len(), 0);
    }

    #[test]
    fn test_stream_keeps_trailing_half_preamble() {
        let bytes = hex::decode(DISCOVERY).unwrap();
        let mut stream = FrameStream::new();
        stream.push(&[0x01, 0x02, 0xAA]);
        assert!(stream.next_frame().is_none());
        assert_eq!(stream.buffered_len(), 1);

        stream.push(&bytes[1..]);
        let frame = stream.next_frame().unwrap().unwrap();
        assert_eq!(frame.opcode, 0xF003);
    }
}
