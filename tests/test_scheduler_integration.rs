//! Scheduler end to end: SAM tracks on disk, reference in memory.

use mapcov::alignment_record::Strand;
use mapcov::alignment_source::{open_track, AlignmentSource};
use mapcov::classify::MappingClass;
use mapcov::consistency::MessageSink;
use mapcov::coverage::CoverageResult;
use mapcov::pipeline::{TrackMode, TrackSet};
use mapcov::request::{IntervalRequest, ReadClassFilter};
use mapcov::scheduler::{ChannelListener, IntervalRequestScheduler, SchedulerConfig, ThreadEvent};
use mapcov::sequence_index::{InMemoryReference, ReferenceSource};
use noodles::bgzf;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

//                       1234567890123456789012345678901234567890
const CHR1: &[u8] = b"ACGTACGGTTGCAACGTTAGCATGCCGATTACAGGCATTA";

const HEADER: &str = "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:40\n";

#[derive(Default)]
struct CollectingSink {
    messages: Mutex<Vec<String>>,
}

impl MessageSink for CollectingSink {
    fn send_message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

fn write_sam(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, format!("{HEADER}{body}")).unwrap();
    path.to_str().unwrap().to_string()
}

fn reference() -> Arc<dyn ReferenceSource> {
    let mut reference = InMemoryReference::new();
    reference.insert("chr1", CHR1);
    Arc::new(reference)
}

fn config() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval: Duration::from_millis(5),
        coalesce_delay: Duration::from_millis(1),
        padding: 5,
    }
}

fn wait_for_result(events: &crossbeam_channel::Receiver<ThreadEvent>) -> Arc<CoverageResult> {
    loop {
        match events.recv_timeout(Duration::from_secs(10)).unwrap() {
            ThreadEvent::Coverage { result, .. } => return result,
            ThreadEvent::Failed { message, .. } => panic!("request failed: {message}"),
            ThreadEvent::Skipped { .. } => panic!("request skipped"),
            ThreadEvent::DownloadStatus { .. } | ThreadEvent::UnzipStatus { .. } => {}
        }
    }
}

#[test]
fn test_classified_coverage_from_sam() {
    let dir = TempDir::new().unwrap();
    // multi: mapped twice, perfectly at 1 and with one mismatch at 21
    // dup: mapped twice, both perfect
    // broken: invalid CIGAR, reported and skipped
    // mates r/1 and r/2 form one read group
    let sam = write_sam(
        dir.path(),
        "reads.sam",
        "multi\t0\tchr1\t1\t60\t5M\t*\t0\t0\tACGTA\t*\n\
         dup\t0\tchr1\t5\t60\t4M\t*\t0\t0\tACGG\t*\n\
         dup\t16\tchr1\t14\t60\t4M\t*\t0\t0\tACGT\t*\n\
         broken\t0\tchr1\t8\t60\t3Q\t*\t0\t0\tGTT\t*\n\
         r\t65\tchr1\t9\t60\t2M1D3M\t*\t0\t0\tTTCAA\t*\n\
         r\t129\tchr1\t30\t60\t4M\t*\t0\t0\tTACA\t*\n\
         multi\t256\tchr1\t21\t60\t5M\t*\t0\t0\tCATGA\t*\n",
    );
    let track = open_track(&sam, None).unwrap();
    let set = TrackSet::new(vec![track], reference(), TrackMode::Combined).unwrap();
    let sink = Arc::new(CollectingSink::default());
    let mut scheduler =
        IntervalRequestScheduler::spawn(set, config(), Arc::clone(&sink) as Arc<dyn MessageSink>)
            .unwrap();

    let (listener, events) = ChannelListener::new();
    let requester = scheduler.requester(Arc::new(listener)).unwrap();
    requester
        .request(0, 10, 30, |r| r.with_diffs_and_gaps(true))
        .unwrap();

    let result = wait_for_result(&events);
    let coverage = match result.as_ref() {
        CoverageResult::Combined(coverage) => coverage,
        other => panic!("expected combined coverage, got {other:?}"),
    };
    assert_eq!(coverage.bounds(), (5, 35));
    let counters = coverage.counters();

    // multi at 1..5 is the single perfect mapping of its read
    assert_eq!(
        counters.count(5, MappingClass::SinglePerfectMatch, Strand::Forward),
        1
    );
    // dup maps perfectly twice
    assert_eq!(counters.count(6, MappingClass::PerfectMatch, Strand::Forward), 1);
    assert_eq!(counters.count(15, MappingClass::PerfectMatch, Strand::Reverse), 1);
    // multi at 21..25 carries one mismatch more than its best mapping
    assert_eq!(counters.count(23, MappingClass::CommonMatch, Strand::Forward), 1);
    // the deletion of r/1 is covered
    assert_eq!(counters.total(11, Strand::Forward), 1);

    let diffs: Vec<(i64, u8)> = coverage.diffs().iter().map(|d| (d.position, d.base)).collect();
    assert_eq!(diffs, vec![(11, b'_'), (25, b'A')]);

    // broken has both an invalid CIGAR and no reference span
    let messages = sink.messages.lock().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().any(|m| m.contains("'broken'")));
    drop(messages);

    scheduler.shutdown();
}

#[test]
fn test_two_sam_tracks_double_and_filtered() {
    let dir = TempDir::new().unwrap();
    let first = write_sam(
        dir.path(),
        "first.sam",
        "a\t0\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\t*\n\
         b\t0\tchr1\t3\t5\t4M\t*\t0\t0\tGTAC\t*\n",
    );
    let second = write_sam(
        dir.path(),
        "second.sam",
        "c\t16\tchr1\t2\t60\t4M\t*\t0\t0\tCGTA\t*\n",
    );
    let tracks: Vec<Arc<dyn AlignmentSource>> =
        vec![open_track(&first, None).unwrap(), open_track(&second, None).unwrap()];
    let set = TrackSet::new(tracks, reference(), TrackMode::Double).unwrap();
    let scheduler =
        IntervalRequestScheduler::spawn(set, config(), Arc::new(CollectingSink::default())).unwrap();

    let (listener, events) = ChannelListener::new();
    let requester = scheduler.requester(Arc::new(listener)).unwrap();
    requester
        .submit(
            IntervalRequest::new(0, 1, 8)
                .with_read_class_filter(ReadClassFilter::all().with_min_mapping_quality(10)),
        )
        .unwrap();

    match wait_for_result(&events).as_ref() {
        CoverageResult::Double(coverage) => {
            // b is below the quality threshold
            assert_eq!(coverage.first.counters().total(5, Strand::Forward), 0);
            assert_eq!(coverage.first.counters().total(4, Strand::Forward), 1);
            assert_eq!(coverage.second.counters().total(4, Strand::Reverse), 1);
            assert_eq!(coverage.difference(1, Strand::Forward), 1);
            assert_eq!(coverage.difference(2, Strand::Reverse), 1);
            assert_eq!(coverage.difference(6, Strand::Reverse), 0);
        }
        other => panic!("expected double coverage, got {other:?}"),
    }
}

#[test]
fn test_missing_track_fails_only_its_request() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("gone.sam");
    let track = open_track(missing.to_str().unwrap(), None).unwrap();
    let set = TrackSet::new(vec![track], reference(), TrackMode::Combined).unwrap();
    let scheduler =
        IntervalRequestScheduler::spawn(set, config(), Arc::new(CollectingSink::default())).unwrap();

    let (listener, events) = ChannelListener::new();
    let requester = scheduler.requester(Arc::new(listener)).unwrap();
    requester.submit(IntervalRequest::new(0, 1, 8)).unwrap();
    loop {
        match events.recv_timeout(Duration::from_secs(10)).unwrap() {
            ThreadEvent::Failed { message, .. } => {
                assert!(message.contains("gone.sam"));
                break;
            }
            ThreadEvent::DownloadStatus { .. } => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }

    // the file shows up, the worker is still serving
    write_sam(
        dir.path(),
        "gone.sam",
        "a\t0\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\t*\n",
    );
    requester.submit(IntervalRequest::new(0, 1, 8)).unwrap();
    match wait_for_result(&events).as_ref() {
        CoverageResult::Combined(coverage) => {
            assert_eq!(coverage.counters().total(2, Strand::Forward), 1)
        }
        other => panic!("expected combined coverage, got {other:?}"),
    }
}

#[test]
fn test_bgzf_sam_reports_decompression() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reads.sam.gz");
    let mut writer = bgzf::io::Writer::new(File::create(&path).unwrap());
    write!(
        writer,
        "{HEADER}a\t0\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\t*\n\
         b\t16\tchr1\t3\t60\t4M\t*\t0\t0\tGTAC\t*\n"
    )
    .unwrap();
    drop(writer);

    let track = open_track(path.to_str().unwrap(), None).unwrap();
    assert!(track.is_compressed());
    let set = TrackSet::new(vec![track], reference(), TrackMode::Combined).unwrap();
    let scheduler =
        IntervalRequestScheduler::spawn(set, config(), Arc::new(CollectingSink::default())).unwrap();

    let (listener, events) = ChannelListener::new();
    let requester = scheduler.requester(Arc::new(listener)).unwrap();
    requester.submit(IntervalRequest::new(0, 1, 8)).unwrap();

    let mut statuses = Vec::new();
    let result = loop {
        match events.recv_timeout(Duration::from_secs(10)).unwrap() {
            ThreadEvent::DownloadStatus { finished, .. } => statuses.push(("download", finished)),
            ThreadEvent::UnzipStatus { finished, .. } => statuses.push(("unzip", finished)),
            ThreadEvent::Coverage { result, .. } => break result,
            other => panic!("unexpected event {other:?}"),
        }
    };
    assert_eq!(
        statuses,
        vec![
            ("download", false),
            ("unzip", false),
            ("unzip", true),
            ("download", true)
        ]
    );

    match result.as_ref() {
        CoverageResult::Combined(coverage) => {
            let counters = coverage.counters();
            assert_eq!(counters.total(2, Strand::Forward), 1);
            assert_eq!(counters.total(4, Strand::Forward), 1);
            assert_eq!(counters.total(4, Strand::Reverse), 1);
            assert_eq!(counters.total(6, Strand::Reverse), 1);
            assert_eq!(counters.total(7, Strand::Reverse), 0);
        }
        other => panic!("expected combined coverage, got {other:?}"),
    }
}

#[test]
fn test_plain_gzip_sam_fails_with_hint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reads.sam.gz");
    // empty plain gzip member, no BGZF extra field
    fs::write(
        &path,
        [
            0x1f_u8, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff, 0x03, 0x00, 0, 0, 0, 0, 0, 0, 0, 0,
        ],
    )
    .unwrap();

    let track = open_track(path.to_str().unwrap(), None).unwrap();
    let set = TrackSet::new(vec![track], reference(), TrackMode::Combined).unwrap();
    let scheduler =
        IntervalRequestScheduler::spawn(set, config(), Arc::new(CollectingSink::default())).unwrap();

    let (listener, events) = ChannelListener::new();
    let requester = scheduler.requester(Arc::new(listener)).unwrap();
    requester.submit(IntervalRequest::new(0, 1, 8)).unwrap();
    loop {
        match events.recv_timeout(Duration::from_secs(10)).unwrap() {
            ThreadEvent::Failed { message, .. } => {
                assert!(message.contains("bgzip"));
                break;
            }
            ThreadEvent::DownloadStatus { .. } | ThreadEvent::UnzipStatus { .. } => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
