//! Chunking transparency and header round-trip properties of the parser.

use boardlink_frame::{encode_frame, Command, Frame, FrameParser};
use bytes::BytesMut;
use proptest::prelude::*;

fn arb_frame() -> impl Strategy<Value = Frame> {
    (
        proptest::sample::select(Command::ALL.to_vec()),
        any::<u8>(),
        any::<u8>(),
        proptest::collection::vec(any::<u8>(), 0..=255usize),
    )
        .prop_map(|(command, process_id, arg, payload)| {
            Frame::new(command, process_id, arg, payload)
        })
}

fn encode_all(frames: &[Frame]) -> Vec<u8> {
    let mut wire = BytesMut::new();
    for frame in frames {
        encode_frame(
            frame.command,
            frame.process_id,
            frame.arg,
            &frame.payload,
            &mut wire,
        )
        .unwrap();
    }
    wire.to_vec()
}

/// Split `wire` at the given cut points (taken modulo the length, sorted).
fn split_at_points(wire: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    if wire.is_empty() {
        return vec![Vec::new()];
    }
    let mut points: Vec<usize> = cuts.iter().map(|c| c % wire.len()).collect();
    points.sort_unstable();
    points.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for point in points {
        chunks.push(wire[start..point].to_vec());
        start = point;
    }
    chunks.push(wire[start..].to_vec());
    chunks
}

proptest! {
    /// Any frame survives encode followed by parse with all fields intact.
    #[test]
    fn roundtrip_reconstructs_fields(frame in arb_frame()) {
        let wire = encode_all(std::slice::from_ref(&frame));
        let parsed = FrameParser::new().feed(&wire).unwrap();
        prop_assert_eq!(parsed, vec![frame]);
    }

    /// Where the transport cuts the stream never changes what is parsed.
    #[test]
    fn chunking_is_transparent(
        frames in proptest::collection::vec(arb_frame(), 1..=8),
        cuts in proptest::collection::vec(any::<usize>(), 0..=24),
    ) {
        let wire = encode_all(&frames);

        let whole = FrameParser::new().feed(&wire).unwrap();
        prop_assert_eq!(&whole, &frames);

        let mut parser = FrameParser::new();
        let mut chunked = Vec::new();
        for chunk in split_at_points(&wire, &cuts) {
            chunked.extend(parser.feed(&chunk).unwrap());
        }
        prop_assert_eq!(&chunked, &frames);
        prop_assert!(parser.is_idle());
    }

    /// Feeding one byte at a time yields the same frames as one big chunk.
    #[test]
    fn byte_at_a_time_matches_single_chunk(
        frames in proptest::collection::vec(arb_frame(), 1..=4),
    ) {
        let wire = encode_all(&frames);
        let mut parser = FrameParser::new();
        let mut parsed = Vec::new();
        for byte in &wire {
            parsed.extend(parser.feed(std::slice::from_ref(byte)).unwrap());
        }
        prop_assert_eq!(parsed, frames);
    }

    /// A frame is never emitted before its last payload byte arrives.
    #[test]
    fn no_emission_before_last_byte(frame in arb_frame()) {
        let wire = encode_all(std::slice::from_ref(&frame));
        let mut parser = FrameParser::new();

        let early = parser.feed(&wire[..wire.len() - 1]).unwrap();
        prop_assert!(early.is_empty());

        let last = parser.feed(&wire[wire.len() - 1..]).unwrap();
        prop_assert_eq!(last, vec![frame]);
    }
}
