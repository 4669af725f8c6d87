use crate::alignment_record::MappingRecord;
use crate::cigar::{is_valid_cigar, parse_cigar};
use crate::error::MappingError;
use log::warn;

/// Receiver of non-fatal consistency messages. Implementations must not panic.
pub trait MessageSink: Send + Sync {
    fn send_message(&self, message: &str);
}

/// Forwards every message to the `warn!` log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn send_message(&self, message: &str) {
        warn!("{}", message);
    }
}

fn report(sink: &dyn MessageSink, error: MappingError) {
    sink.send_message(&error.to_string());
}

fn inconsistent(sink: &dyn MessageSink, message: String) {
    report(sink, MappingError::ConsistencyViolation(message));
}

/// Validate the coordinates and sequence of a candidate mapping.
///
/// Every violation is reported to `sink` as a [`MappingError::ConsistencyViolation`],
/// none short-circuits the others. Returns `false` if anything was reported.
pub fn check_basic(
    read_seq: &[u8],
    ref_length: usize,
    start: i64,
    stop: i64,
    sink: &dyn MessageSink,
) -> bool {
    let mut consistent = true;
    let ref_length = ref_length as i64;

    if read_seq.is_empty() {
        inconsistent(sink, "Read sequence is empty".to_string());
        consistent = false;
    }
    if ref_length == 0 {
        inconsistent(sink, "Reference sequence is empty".to_string());
        consistent = false;
    }
    if start < 1 || start > ref_length {
        inconsistent(
            sink,
            format!("Start {start} lies outside the reference (length {ref_length})"),
        );
        consistent = false;
    }
    if stop < 1 || stop > ref_length {
        inconsistent(
            sink,
            format!("Stop {stop} lies outside the reference (length {ref_length})"),
        );
        consistent = false;
    }
    if start >= stop {
        inconsistent(sink, format!("Start {start} is larger or equal to stop {stop}"));
        consistent = false;
    }

    consistent
}

/// [`check_basic`] plus CIGAR grammar validation for SAM/BAM records.
pub fn check_sam(record: &MappingRecord, ref_length: usize, sink: &dyn MessageSink) -> bool {
    let mut consistent = check_basic(
        &record.read_sequence,
        ref_length,
        record.alignment_start,
        record.alignment_end,
        sink,
    );

    if !is_valid_cigar(&record.cigar) {
        report(
            sink,
            MappingError::MalformedInput(format!(
                "Read '{}' has an invalid CIGAR string '{}'",
                record.read_name, record.cigar
            )),
        );
        consistent = false;
    } else if let Err(e) = parse_cigar(&record.cigar) {
        sink.send_message(&format!("Read '{}': {}", record.read_name, e));
        consistent = false;
    }

    consistent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment_record::Strand;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        messages: Mutex<Vec<String>>,
    }

    impl MessageSink for CollectingSink {
        fn send_message(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    impl CollectingSink {
        fn count(&self) -> usize {
            self.messages.lock().unwrap().len()
        }
    }

    fn record(cigar: &str, start: i64, end: i64) -> MappingRecord {
        MappingRecord {
            read_name: "read1".to_string(),
            pair_tag: None,
            reference_name: "chr1".to_string(),
            alignment_start: start,
            alignment_end: end,
            strand: Strand::Forward,
            mapping_quality: 60,
            cigar: cigar.to_string(),
            read_sequence: b"ACGTACGT".to_vec(),
        }
    }

    #[test]
    fn test_consistent_mapping() {
        let sink = CollectingSink::default();
        assert!(check_basic(b"ACGT", 1000, 10, 13, &sink));
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_every_violation_reported_once() {
        let sink = CollectingSink::default();
        assert!(!check_basic(b"", 100, 150, 120, &sink));
        // empty read, start out of bounds, stop out of bounds, start >= stop
        assert_eq!(sink.count(), 4);
    }

    #[test]
    fn test_start_equal_stop() {
        let sink = CollectingSink::default();
        assert!(!check_basic(b"A", 100, 10, 10, &sink));
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_violations_reported_by_kind() {
        let sink = CollectingSink::default();
        assert!(!check_sam(&record("4Q", 5, 5), 100, &sink));
        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("Inconsistent mapping: Start 5"));
        assert!(messages[1].starts_with("Malformed input: Read 'read1'"));
    }

    #[test]
    fn test_empty_reference() {
        let sink = CollectingSink::default();
        assert!(!check_basic(b"ACGT", 0, 1, 4, &sink));
        assert!(sink.messages.lock().unwrap()[0].contains("Reference"));
    }

    #[test]
    fn test_check_sam_cigar() {
        let sink = CollectingSink::default();
        assert!(check_sam(&record("8M", 1, 8), 100, &sink));
        assert!(!check_sam(&record("8Q", 1, 8), 100, &sink));
        assert!(!check_sam(&record("0M8M", 1, 8), 100, &sink));
        assert_eq!(sink.count(), 2);
    }

    #[test]
    fn test_check_sam_reports_coordinates_and_cigar() {
        let sink = CollectingSink::default();
        assert!(!check_sam(&record("*", 90, 120), 100, &sink));
        assert_eq!(sink.count(), 2);
    }
}
