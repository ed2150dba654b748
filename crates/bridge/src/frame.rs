//! Framing protocol for the compositor's output stream.
//!
//! The worker multiplexes every response onto a single byte stream as
//! `remotion_buffer:<nonce>;<length>:<payload>`, where `<nonce>` and
//! `<length>` are ASCII digit runs and `<payload>` is exactly `<length>`
//! raw bytes. Payload bytes are opaque — they may contain `;`, `:`, or even
//! the preamble itself, so messages must be sliced strictly by the declared
//! length and never by delimiter search.
//!
//! [`FrameDecoder`] is an incremental state machine fed with chunks in
//! whatever sizes the pipe delivers them. Header bytes are consumed one at
//! a time (headers are tiny); payload bytes are consumed in bulk slices, so
//! a payload spread over many small reads costs O(bytes), not O(bytes²).

use renderweld_common::{WeldError, WeldResult};

/// Byte sequence announcing the start of a message.
pub const FRAME_PREAMBLE: &[u8] = b"remotion_buffer:";

/// KMP failure table for [`FRAME_PREAMBLE`]: `border[i]` is the longest
/// proper prefix of the preamble that is also a suffix of its first `i`
/// bytes. Keeps partial-match restarts correct when a false start overlaps
/// the real preamble (e.g. `remotion_bufferemotion_buffer:`).
fn preamble_border_table() -> [usize; FRAME_PREAMBLE.len()] {
    let mut border = [0usize; FRAME_PREAMBLE.len()];
    let mut k = 0;
    for i in 1..FRAME_PREAMBLE.len() {
        while k > 0 && FRAME_PREAMBLE[i] != FRAME_PREAMBLE[k] {
            k = border[k];
        }
        if FRAME_PREAMBLE[i] == FRAME_PREAMBLE[k] {
            k += 1;
        }
        border[i] = k;
    }
    border
}

/// One complete demultiplexed message from the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation nonce tying the message to a pending command.
    pub nonce: u64,

    /// Raw payload bytes, exactly as declared by the header.
    pub payload: Vec<u8>,
}

enum DecodeState {
    /// Scanning for the preamble; `matched` bytes of it have been seen,
    /// possibly across chunk boundaries.
    SeekPreamble { matched: usize },

    /// Accumulating nonce digits until `;`.
    ReadNonce { nonce: u64, digits: usize },

    /// Accumulating length digits until `:`.
    ReadLength { nonce: u64, length: usize, digits: usize },

    /// Collecting exactly `remaining` payload bytes.
    ReadPayload {
        nonce: u64,
        payload: Vec<u8>,
        remaining: usize,
    },
}

/// Incremental decoder for the worker's framed output stream.
pub struct FrameDecoder {
    state: DecodeState,
    border: [usize; FRAME_PREAMBLE.len()],
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::SeekPreamble { matched: 0 },
            border: preamble_border_table(),
        }
    }

    /// Feed one chunk of stream bytes, returning every frame completed by
    /// it. A single chunk may complete zero frames (header or payload still
    /// short) or several (multiple messages delivered in one read).
    pub fn feed(&mut self, chunk: &[u8]) -> WeldResult<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut i = 0;

        while i < chunk.len() {
            let mut next: Option<DecodeState> = None;

            match &mut self.state {
                DecodeState::SeekPreamble { matched } => {
                    let byte = chunk[i];
                    i += 1;
                    let mut m = *matched;
                    loop {
                        if byte == FRAME_PREAMBLE[m] {
                            m += 1;
                            break;
                        }
                        if m == 0 {
                            break;
                        }
                        m = self.border[m];
                    }
                    if m == FRAME_PREAMBLE.len() {
                        next = Some(DecodeState::ReadNonce {
                            nonce: 0,
                            digits: 0,
                        });
                    } else {
                        *matched = m;
                    }
                }

                DecodeState::ReadNonce { nonce, digits } => {
                    let byte = chunk[i];
                    i += 1;
                    if byte == b';' {
                        if *digits == 0 {
                            return Err(WeldError::protocol("empty nonce in message header"));
                        }
                        next = Some(DecodeState::ReadLength {
                            nonce: *nonce,
                            length: 0,
                            digits: 0,
                        });
                    } else if byte.is_ascii_digit() {
                        *nonce = nonce
                            .checked_mul(10)
                            .and_then(|n| n.checked_add(u64::from(byte - b'0')))
                            .ok_or_else(|| {
                                WeldError::protocol("nonce overflows 64 bits")
                            })?;
                        *digits += 1;
                    } else {
                        return Err(WeldError::protocol(format!(
                            "unexpected byte {byte:#04x} in nonce"
                        )));
                    }
                }

                DecodeState::ReadLength {
                    nonce,
                    length,
                    digits,
                } => {
                    let byte = chunk[i];
                    i += 1;
                    if byte == b':' {
                        if *digits == 0 {
                            return Err(WeldError::protocol("empty length in message header"));
                        }
                        if *length == 0 {
                            frames.push(Frame {
                                nonce: *nonce,
                                payload: Vec::new(),
                            });
                            next = Some(DecodeState::SeekPreamble { matched: 0 });
                        } else {
                            next = Some(DecodeState::ReadPayload {
                                nonce: *nonce,
                                payload: Vec::with_capacity(*length),
                                remaining: *length,
                            });
                        }
                    } else if byte.is_ascii_digit() {
                        *length = length
                            .checked_mul(10)
                            .and_then(|n| n.checked_add(usize::from(byte - b'0')))
                            .ok_or_else(|| {
                                WeldError::protocol("declared length overflows usize")
                            })?;
                        *digits += 1;
                    } else {
                        return Err(WeldError::protocol(format!(
                            "unexpected byte {byte:#04x} in declared length"
                        )));
                    }
                }

                DecodeState::ReadPayload {
                    nonce,
                    payload,
                    remaining,
                } => {
                    let take = (*remaining).min(chunk.len() - i);
                    payload.extend_from_slice(&chunk[i..i + take]);
                    *remaining -= take;
                    i += take;
                    if *remaining == 0 {
                        frames.push(Frame {
                            nonce: *nonce,
                            payload: std::mem::take(payload),
                        });
                        next = Some(DecodeState::SeekPreamble { matched: 0 });
                    }
                }
            }

            if let Some(state) = next {
                self.state = state;
            }
        }

        Ok(frames)
    }

    /// Number of payload bytes still owed to the message currently being
    /// decoded, if the decoder is mid-payload.
    pub fn payload_shortfall(&self) -> Option<usize> {
        match &self.state {
            DecodeState::ReadPayload { remaining, .. } => Some(*remaining),
            _ => None,
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(nonce: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(FRAME_PREAMBLE);
        out.extend_from_slice(format!("{nonce};{}:", payload.len()).as_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn decode_whole(stream: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        decoder.feed(stream).expect("stream should decode")
    }

    #[test]
    fn test_single_message_one_chunk() {
        let frames = decode_whole(&encode(7, b"hello"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].nonce, 7);
        assert_eq!(frames[0].payload, b"hello");
    }

    #[test]
    fn test_two_messages_one_chunk() {
        let mut stream = encode(1, b"first");
        stream.extend_from_slice(&encode(2, b"second"));
        let frames = decode_whole(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame { nonce: 1, payload: b"first".to_vec() });
        assert_eq!(frames[1], Frame { nonce: 2, payload: b"second".to_vec() });
    }

    #[test]
    fn test_empty_payload() {
        let frames = decode_whole(&encode(3, b""));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].nonce, 3);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_log_channel_nonce_zero() {
        let frames = decode_whole(&encode(0, b"diagnostic line"));
        assert_eq!(frames[0].nonce, 0);
    }

    #[test]
    fn test_payload_containing_preamble_is_not_a_boundary() {
        let mut tricky = Vec::new();
        tricky.extend_from_slice(b"abc");
        tricky.extend_from_slice(FRAME_PREAMBLE);
        tricky.extend_from_slice(b"9;4:fake");
        let mut stream = encode(5, &tricky);
        stream.extend_from_slice(&encode(6, b"real"));

        let frames = decode_whole(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].nonce, 5);
        assert_eq!(frames[0].payload, tricky);
        assert_eq!(frames[1].nonce, 6);
        assert_eq!(frames[1].payload, b"real");
    }

    #[test]
    fn test_payload_with_delimiter_bytes() {
        let payload = b";:;;::remotion";
        let frames = decode_whole(&encode(12, payload));
        assert_eq!(frames[0].payload, payload);
    }

    #[test]
    fn test_every_two_way_split_matches_single_chunk() {
        let mut stream = encode(41, b"alpha");
        stream.extend_from_slice(&encode(42, &[0u8, b';', b':', 0xff, b'r']));
        stream.extend_from_slice(&encode(43, b""));
        let expected = decode_whole(&stream);

        for split in 0..=stream.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = decoder.feed(&stream[..split]).unwrap();
            frames.extend(decoder.feed(&stream[split..]).unwrap());
            assert_eq!(frames, expected, "split at byte {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let stream = encode(9, b"one byte at a time");
        let expected = decode_whole(&stream);

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in &stream {
            frames.extend(decoder.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(frames, expected);
    }

    #[test]
    fn test_partial_preamble_restart() {
        // "remo" then a fresh full preamble: the aborted match must not
        // swallow the restart.
        let mut stream = b"remo".to_vec();
        stream.extend_from_slice(&encode(4, b"ok"));
        let frames = decode_whole(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].nonce, 4);
    }

    #[test]
    fn test_restart_on_repeated_first_byte() {
        // "remotion_buff" + "remotion_buffer:..." — the mismatching 'r'
        // begins the real preamble.
        let mut stream = b"remotion_buff".to_vec();
        stream.extend_from_slice(&encode(8, b"x"));
        let frames = decode_whole(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].nonce, 8);
    }

    #[test]
    fn test_overlapping_false_start() {
        // Garbage "remotion_buffe" immediately followed by a real message:
        // the aborted 15-byte match overlaps the true preamble start.
        let mut stream = b"remotion_buffe".to_vec();
        stream.extend_from_slice(&encode(4, b"ok"));
        let frames = decode_whole(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].nonce, 4);
        assert_eq!(frames[0].payload, b"ok");
    }

    #[test]
    fn test_payload_shortfall_reported() {
        let stream = encode(2, b"0123456789");
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&stream[..stream.len() - 4]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(decoder.payload_shortfall(), Some(4));

        let frames = decoder.feed(&stream[stream.len() - 4..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.payload_shortfall(), None);
    }

    #[test]
    fn test_non_digit_in_nonce_is_protocol_error() {
        let mut stream = FRAME_PREAMBLE.to_vec();
        stream.extend_from_slice(b"12x;3:abc");
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&stream).is_err());
    }

    #[test]
    fn test_non_digit_in_length_is_protocol_error() {
        let mut stream = FRAME_PREAMBLE.to_vec();
        stream.extend_from_slice(b"12;3a:abc");
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&stream).is_err());
    }

    #[test]
    fn test_empty_nonce_is_protocol_error() {
        let mut stream = FRAME_PREAMBLE.to_vec();
        stream.extend_from_slice(b";3:abc");
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&stream).is_err());
    }

    proptest! {
        /// Chunk boundaries must be invisible: any segmentation of a valid
        /// stream produces exactly the frames of single-chunk delivery,
        /// including splits mid-preamble, mid-header, and mid-payload.
        #[test]
        fn prop_arbitrary_splits_are_equivalent(
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..200),
                1..5,
            ),
            cuts in proptest::collection::vec(any::<usize>(), 0..12),
        ) {
            let mut stream = Vec::new();
            for (i, payload) in payloads.iter().enumerate() {
                stream.extend_from_slice(&encode(i as u64 + 1, payload));
            }

            let expected = decode_whole(&stream);
            prop_assert_eq!(expected.len(), payloads.len());

            let mut cut_points: Vec<usize> =
                cuts.iter().map(|c| c % (stream.len() + 1)).collect();
            cut_points.sort_unstable();
            cut_points.dedup();

            let mut decoder = FrameDecoder::new();
            let mut frames = Vec::new();
            let mut start = 0;
            for cut in cut_points {
                frames.extend(decoder.feed(&stream[start..cut]).unwrap());
                start = cut;
            }
            frames.extend(decoder.feed(&stream[start..]).unwrap());

            prop_assert_eq!(frames, expected);
        }

        /// Payloads that embed the literal preamble must never create a
        /// false message boundary.
        #[test]
        fn prop_embedded_preamble_never_splits_payload(
            prefix in proptest::collection::vec(any::<u8>(), 0..50),
            suffix in proptest::collection::vec(any::<u8>(), 0..50),
        ) {
            let mut payload = prefix;
            payload.extend_from_slice(FRAME_PREAMBLE);
            payload.extend_from_slice(b"1;1:");
            payload.extend_from_slice(&suffix);

            let frames = decode_whole(&encode(77, &payload));
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(&frames[0].payload, &payload);
        }
    }
}
