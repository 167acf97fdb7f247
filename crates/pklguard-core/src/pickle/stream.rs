use crate::error::DecodeFault;
use crate::pickle::opcodes::Opcode;
use crate::pickle::read::OpcodeReader;
use crate::symbols::model::Tracked;
use crate::symbols::track::SymbolTracker;

/// Everything learned from decoding a pickle buffer.
#[derive(Debug, Clone, Default)]
pub struct StreamFacts {
    /// Imports and unresolved imports, in stream order.
    pub tracked: Vec<Tracked>,
    /// Set when decoding stopped on malformed input.
    pub fault: Option<DecodeFault>,
    /// Number of complete (STOP-terminated) pickle streams.
    pub streams: usize,
    pub instructions: u64,
    /// Offset of undecoded bytes after the last STOP, if any.
    pub trailing_at: Option<u64>,
    /// Fault in a stream that followed a STOP without a PROTO header.
    /// Such bytes may be raw payload, so this is not a scan error.
    pub trailing_fault: Option<DecodeFault>,
}

/// First byte of a pickle stream: PROTO or a protocol 0/1 opener.
pub fn starts_stream(byte: u8) -> bool {
    byte == Opcode::Proto.byte() || Opcode::from_byte(byte).is_some_and(Opcode::can_start_stream)
}

/// Decode one or more concatenated pickle streams.
///
/// Decoding resumes after every STOP whose next byte can open a stream, the
/// way a loader calling `load` in a loop would. Bytes that cannot are left
/// undecoded and reported through `trailing_at`.
pub fn decode_streams(bytes: &[u8]) -> StreamFacts {
    let mut facts = StreamFacts::default();
    let mut tracker = SymbolTracker::new();
    let mut pos = 0;
    let mut headed = true;

    loop {
        tracker.start_stream();
        let mut reader = OpcodeReader::starting_at(bytes, pos);
        let mut fault = None;
        for item in reader.by_ref() {
            match item {
                Ok(instr) => {
                    facts.instructions += 1;
                    tracker.observe(&instr);
                }
                Err(f) => fault = Some(f),
            }
        }
        if let Some(fault) = fault {
            if headed {
                facts.fault = Some(fault);
            } else {
                facts.trailing_at = Some(pos as u64);
                facts.trailing_fault = Some(fault);
            }
            break;
        }

        facts.streams += 1;
        pos = reader.position();
        match bytes.get(pos) {
            None => break,
            Some(&b) if starts_stream(b) => headed = b == Opcode::Proto.byte(),
            Some(_) => {
                facts.trailing_at = Some(pos as u64);
                break;
            }
        }
    }

    facts.tracked = tracker.finish();
    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeFaultKind;

    #[test]
    fn single_stream_without_imports() {
        let facts = decode_streams(b"\x80\x02]q\x00(K\x01K\x02e.");
        assert_eq!(facts.streams, 1);
        assert!(facts.tracked.is_empty());
        assert!(facts.fault.is_none());
        assert!(facts.trailing_at.is_none());
    }

    #[test]
    fn concatenated_streams_are_all_decoded() {
        let mut bytes = b"\x80\x02N.".to_vec();
        let second = bytes.len() as u64;
        bytes.extend_from_slice(b"\x80\x02cos\nsystem\n.");

        let facts = decode_streams(&bytes);
        assert_eq!(facts.streams, 2);
        assert_eq!(facts.tracked.len(), 1);
        assert_eq!(facts.tracked[0].offset(), second + 2);
    }

    #[test]
    fn trailing_bytes_after_stop_are_flagged() {
        let facts = decode_streams(b"\x80\x02N.\x00\x01\x02raw tensor bytes");
        assert_eq!(facts.streams, 1);
        assert_eq!(facts.trailing_at, Some(4));
        assert!(facts.fault.is_none());
    }

    #[test]
    fn headerless_stream_after_stop_is_decoded() {
        let facts = decode_streams(b"\x80\x02N.cos\nsystem\n(S'id'\ntR.");
        assert_eq!(facts.streams, 2);
        assert_eq!(facts.tracked.len(), 1);
        assert_eq!(facts.tracked[0].offset(), 4);
        assert!(facts.trailing_at.is_none());
        assert!(facts.fault.is_none());
    }

    #[test]
    fn fault_in_headerless_trailing_stream_is_not_a_scan_fault() {
        let facts = decode_streams(b"\x80\x02N.cos\nsystem\nK");
        assert_eq!(facts.streams, 1);
        assert!(facts.fault.is_none());
        assert_eq!(facts.trailing_at, Some(4));
        assert!(facts.trailing_fault.is_some());
        assert_eq!(facts.tracked.len(), 1);
    }

    #[test]
    fn stream_starters() {
        assert!(starts_stream(0x80));
        assert!(starts_stream(b'c'));
        assert!(starts_stream(b'('));
        assert!(!starts_stream(0x00));
        assert!(!starts_stream(b'.'));
    }

    #[test]
    fn fault_keeps_imports_seen_before_it() {
        let facts = decode_streams(b"\x80\x02cos\nsystem\n\x8c\x09trunc");
        assert_eq!(facts.tracked.len(), 1);
        let fault = facts.fault.unwrap();
        assert_eq!(fault.kind, DecodeFaultKind::Truncated("SHORT_BINUNICODE"));
        assert_eq!(facts.streams, 0);
    }

    #[test]
    fn fault_in_second_stream_is_reported() {
        let facts = decode_streams(b"\x80\x02N.\x80\x02\xff");
        assert_eq!(facts.streams, 1);
        assert_eq!(facts.fault.unwrap().offset, 6);
    }
}
