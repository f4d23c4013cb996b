//! Property-based tests for the frame codec.

use proptest::prelude::*;
use tis_packet::{
    checksum, decode_frame, Address, DecodeError, FrameStream, Identity, Message, PREAMBLE,
};

fn any_address() -> impl Strategy<Value = Address> {
    (any::<u8>(), any::<u8>()).prop_map(|(subnet, device)| Address::new(subnet, device))
}

fn any_message() -> impl Strategy<Value = Message> {
    (
        any_address(),
        any::<u16>(),
        any::<u16>(),
        any_address(),
        proptest::collection::vec(any::<u8>(), 0..=200),
    )
        .prop_map(|(source, source_kind, opcode, target, payload)| {
            Identity::new(source, source_kind).raw(target, opcode, payload)
        })
}

proptest! {
    #[test]
    fn test_round_trip(msg in any_message()) {
        let bytes = msg.encode().unwrap();
        let frame = decode_frame(&bytes).unwrap();
        prop_assert_eq!(Message::from(&frame), msg);
        prop_assert_eq!(frame.to_bytes(), bytes);
    }

    #[test]
    fn test_length_invariant(msg in any_message()) {
        let bytes = msg.encode().unwrap();
        prop_assert_eq!(bytes[PREAMBLE.len()] as usize, bytes.len() - PREAMBLE.len());
        prop_assert_eq!(bytes[PREAMBLE.len()] as usize, 11 + msg.payload.len());
    }

    #[test]
    fn test_truncation_rejected(msg in any_message(), cut in 1usize..=4) {
        let bytes = msg.encode().unwrap();
        let short = &bytes[..bytes.len() - cut];
        let result = decode_frame(short);
        let rejected = matches!(
            result,
            Err(DecodeError::LengthMismatch { .. }) | Err(DecodeError::TooShort { .. })
        );
        prop_assert!(rejected);
    }

    #[test]
    fn test_bit_flip_rejected(msg in any_message(), pick in any::<prop::sample::Index>(), bit in 0u8..8) {
        let mut bytes = msg.encode().unwrap();
        // Body only: after preamble and length byte, before the checksum.
        let body_start = PREAMBLE.len() + 1;
        let body_end = bytes.len() - 2;
        let at = body_start + pick.index(body_end - body_start);
        bytes[at] ^= 1 << bit;

        let is_mismatch = matches!(decode_frame(&bytes), Err(DecodeError::ChecksumMismatch { .. }));
        prop_assert!(is_mismatch);
    }

    #[test]
    fn test_checksum_deterministic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(checksum(&data), checksum(&data));
    }

    #[test]
    fn test_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..300)) {
        let _ = decode_frame(&data);
    }

    #[test]
    fn test_stream_splits_anywhere(a in any_message(), b in any_message(), split in any::<prop::sample::Index>()) {
        let mut data = a.encode().unwrap();
        data.extend(b.encode().unwrap());
        let at = split.index(data.len());

        let mut stream = FrameStream::new();
        stream.push(&data[..at]);
        let mut frames = stream.drain();
        stream.push(&data[at..]);
        frames.extend(stream.drain());

        prop_assert_eq!(frames.len(), 2);
        let first = frames[0].as_ref().unwrap();
        let second = frames[1].as_ref().unwrap();
        prop_assert_eq!(&Message::from(first), &a);
        prop_assert_eq!(&Message::from(second), &b);
    }
}
