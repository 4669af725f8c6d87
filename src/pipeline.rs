//! Fetch-and-aggregate pipeline run for one request.
//!
//! Records are fetched from each track, checked for consistency, compared
//! against the reference, grouped by read, classified and finally counted
//! into a [`CoverageAggregator`]. Tracks of a set are loaded in parallel and
//! merged (or kept side by side in double mode) before anything is returned.

use crate::alignment_record::MappingRecord;
use crate::alignment_source::AlignmentSource;
use crate::cigar::{aligned_blocks, parse_cigar, CigarOp};
use crate::classify::{classify_group, Classifiable, Classification, ReadGroups};
use crate::consistency::{check_sam, MessageSink};
use crate::coverage::{CoverageAggregator, CoverageResult, TwoTrackCoverage};
use crate::diff::{count_diffs_and_gaps, extract_diffs_and_gaps, DiffAndGapResult};
use crate::error::{MappingError, Result};
use crate::request::IntervalRequest;
use crate::seqidx::ChromosomeIndex;
use crate::sequence_index::ReferenceSource;
use log::{debug, error};
use rayon::prelude::*;
use std::sync::Arc;

/// How the tracks of a set are presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    /// Counts of all tracks summed into one result
    Combined,
    /// Exactly two tracks kept apart, with their difference
    Double,
}

/// Tracks served together by one scheduler, with the reference they map to
pub struct TrackSet {
    tracks: Vec<Arc<dyn AlignmentSource>>,
    reference: Arc<dyn ReferenceSource>,
    chromosomes: ChromosomeIndex,
    mode: TrackMode,
}

impl TrackSet {
    pub fn new(
        tracks: Vec<Arc<dyn AlignmentSource>>,
        reference: Arc<dyn ReferenceSource>,
        mode: TrackMode,
    ) -> Result<Self> {
        if tracks.is_empty() {
            return Err(MappingError::Configuration(
                "A track set needs at least one track".to_string(),
            ));
        }
        if mode == TrackMode::Double && tracks.len() != 2 {
            return Err(MappingError::Configuration(format!(
                "Double mode needs exactly two tracks, got {}",
                tracks.len()
            )));
        }
        let chromosomes = ChromosomeIndex::from_reference(reference.as_ref());
        Ok(Self {
            tracks,
            reference,
            chromosomes,
            mode,
        })
    }

    pub fn tracks(&self) -> &[Arc<dyn AlignmentSource>] {
        &self.tracks
    }

    pub fn reference(&self) -> &dyn ReferenceSource {
        self.reference.as_ref()
    }

    pub fn chromosomes(&self) -> &ChromosomeIndex {
        &self.chromosomes
    }

    pub fn mode(&self) -> TrackMode {
        self.mode
    }

    fn chromosome_name(&self, chromosome_id: u32) -> Result<&str> {
        self.chromosomes.get_name(chromosome_id).ok_or_else(|| {
            MappingError::Resource(format!("Unknown chromosome id {}", chromosome_id))
        })
    }
}

/// A consistent mapping together with what the reference comparison found
#[derive(Debug, Clone)]
pub struct ExtractedMapping {
    pub record: MappingRecord,
    pub ops: Vec<CigarOp>,
    /// Diffs and gaps are only filled in when they were asked for; the count always is
    pub extraction: DiffAndGapResult,
}

impl Classifiable for ExtractedMapping {
    fn read_name(&self) -> &str {
        &self.record.read_name
    }

    fn difference_count(&self) -> usize {
        self.extraction.difference_count
    }

    fn alignment_start(&self) -> i64 {
        self.record.alignment_start
    }
}

#[derive(Debug, Clone)]
pub struct ClassifiedMapping {
    pub mapping: ExtractedMapping,
    pub classification: Classification,
}

/// Check every record and compare it against the reference.
///
/// Inconsistent or malformed records are reported to `sink` and dropped. The
/// reference is fetched once for the span of all surviving records.
pub fn extract_mappings(
    records: Vec<MappingRecord>,
    reference: &dyn ReferenceSource,
    chromosome: &str,
    with_diffs_and_gaps: bool,
    sink: &dyn MessageSink,
) -> Result<Vec<ExtractedMapping>> {
    let ref_length = reference.sequence_length(chromosome)?;

    let records: Vec<MappingRecord> = records
        .into_iter()
        .filter(|record| check_sam(record, ref_length, sink))
        .collect();
    if records.is_empty() {
        return Ok(Vec::new());
    }

    // check_sam guarantees 1 <= start < stop <= ref_length for every survivor
    let window_start = records.iter().map(|r| r.alignment_start).min().unwrap_or(1);
    let window_end = records
        .iter()
        .map(|r| r.alignment_end)
        .max()
        .unwrap_or(window_start);
    let ref_window = reference.fetch_sequence(chromosome, window_start, window_end)?;

    let mut mappings = Vec::with_capacity(records.len());
    for record in records {
        let offset = (record.alignment_start - window_start) as usize;
        match extract_one(&record, &ref_window[offset..], with_diffs_and_gaps) {
            Ok((ops, extraction)) => mappings.push(ExtractedMapping {
                record,
                ops,
                extraction,
            }),
            Err(e) if e.is_record_level() => {
                sink.send_message(&format!("Skipping read '{}': {}", record.read_name, e));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(mappings)
}

fn extract_one(
    record: &MappingRecord,
    ref_seq: &[u8],
    with_diffs_and_gaps: bool,
) -> Result<(Vec<CigarOp>, DiffAndGapResult)> {
    let ops = parse_cigar(&record.cigar)?;
    let extraction = if with_diffs_and_gaps {
        extract_diffs_and_gaps(
            &ops,
            &record.read_sequence,
            ref_seq,
            record.is_reverse_strand(),
            record.alignment_start,
        )?
    } else {
        DiffAndGapResult {
            difference_count: count_diffs_and_gaps(&ops, &record.read_sequence, ref_seq)?,
            ..DiffAndGapResult::default()
        }
    };
    Ok((ops, extraction))
}

/// Group mappings by read and classify each group once it is complete.
///
/// Output follows group order (first appearance of each read), members in
/// input order within their group.
pub fn classify_mappings(mappings: Vec<ExtractedMapping>) -> Result<Vec<ClassifiedMapping>> {
    let groups = ReadGroups::collect(mappings);
    let mut classified = Vec::new();
    for group in groups {
        let classifications = classify_group(&group)?;
        classified.extend(
            group
                .members
                .into_iter()
                .zip(classifications)
                .map(|(mapping, classification)| ClassifiedMapping {
                    mapping,
                    classification,
                }),
        );
    }
    Ok(classified)
}

/// Fetch, check and classify all mappings of one track in `[from, to]`.
pub fn classify_track(
    track: &dyn AlignmentSource,
    reference: &dyn ReferenceSource,
    chromosome: &str,
    from: i64,
    to: i64,
    with_diffs_and_gaps: bool,
    sink: &dyn MessageSink,
) -> Result<Vec<ClassifiedMapping>> {
    let records = track.fetch(chromosome, from, to, sink)?;
    let fetched = records.len();
    let mappings = extract_mappings(records, reference, chromosome, with_diffs_and_gaps, sink)?;
    debug!(
        "{}: {} of {} mappings in {}:{}-{} passed the consistency checks",
        track.name(),
        mappings.len(),
        fetched,
        chromosome,
        from,
        to
    );
    classify_mappings(mappings)
}

/// Build the coverage of one track for the padded window of `request`.
pub fn load_track(
    track: &dyn AlignmentSource,
    reference: &dyn ReferenceSource,
    chromosome: &str,
    request: &IntervalRequest,
    sink: &dyn MessageSink,
) -> Result<CoverageAggregator> {
    let classified = classify_track(
        track,
        reference,
        chromosome,
        request.total_from,
        request.total_to,
        request.wants_diffs_and_gaps,
        sink,
    )
    .inspect_err(|e| {
        if let MappingError::InvariantViolation { .. } = e {
            error!("{}: {}", track.name(), e);
        }
    })?;

    let filter = request.read_class_filter;
    let mut aggregator = CoverageAggregator::loading(request);
    for ClassifiedMapping {
        mapping,
        classification,
    } in &classified
    {
        if !filter.accepts(classification.class, mapping.record.mapping_quality) {
            continue;
        }
        let blocks = aligned_blocks(mapping.record.alignment_start, &mapping.ops);
        aggregator.add_mapping(&blocks, classification.class, mapping.record.strand);
        aggregator.add_diffs_and_gaps(&mapping.extraction);
    }
    aggregator.finish();
    Ok(aggregator)
}

/// Load every track of the set in parallel and combine them per the set's mode.
pub fn load_coverage(
    track_set: &TrackSet,
    request: &IntervalRequest,
    sink: &dyn MessageSink,
) -> Result<CoverageResult> {
    let chromosome = track_set.chromosome_name(request.chromosome_id)?;
    let reference = track_set.reference();

    let mut per_track: Vec<CoverageAggregator> = track_set
        .tracks
        .par_iter()
        .map(|track| load_track(track.as_ref(), reference, chromosome, request, sink))
        .collect::<Result<Vec<_>>>()?;

    match track_set.mode {
        TrackMode::Combined => Ok(CoverageResult::Combined(
            CoverageAggregator::combine_tracks(per_track)?,
        )),
        TrackMode::Double => {
            let second = per_track.pop();
            let first = per_track.pop();
            match (first, second) {
                (Some(first), Some(second)) => {
                    Ok(CoverageResult::Double(TwoTrackCoverage::new(first, second)))
                }
                _ => Err(MappingError::Configuration(
                    "Double mode needs exactly two tracks".to_string(),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment_record::Strand;
    use crate::alignment_source::InMemoryTrack;
    use crate::classify::MappingClass;
    use crate::coverage::CoverageState;
    use crate::request::ReadClassFilter;
    use crate::sequence_index::InMemoryReference;
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

    //            1234567890123456789012345
    const CHR1: &[u8] = b"ACGTACGGTTGCAACGTTAGCATGC";

    fn record(name: &str, start: i64, cigar: &str, seq: &str, strand: Strand) -> MappingRecord {
        let ops = parse_cigar(cigar).unwrap();
        MappingRecord {
            read_name: name.to_string(),
            pair_tag: None,
            reference_name: "chr1".to_string(),
            alignment_start: start,
            alignment_end: crate::cigar::alignment_stop(start, &ops),
            strand,
            mapping_quality: 60,
            cigar: cigar.to_string(),
            read_sequence: seq.as_bytes().to_vec(),
        }
    }

    fn reference() -> Arc<dyn ReferenceSource> {
        let mut reference = InMemoryReference::new();
        reference.insert("chr1", CHR1);
        Arc::new(reference)
    }

    fn track(name: &str, records: Vec<MappingRecord>) -> Arc<dyn AlignmentSource> {
        Arc::new(InMemoryTrack::new(name, records))
    }

    #[test]
    fn test_extract_skips_bad_records() {
        let sink = CollectingSink::default();
        let records = vec![
            record("good", 1, "4M", "ACGT", Strand::Forward),
            // runs past the end of the chromosome
            record("late", 24, "4M", "ACGT", Strand::Forward),
            // CIGAR wants more read bases than there are
            record("short", 5, "6M", "ACGG", Strand::Forward),
        ];
        let mappings =
            extract_mappings(records, reference().as_ref(), "chr1", true, &sink).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].record.read_name, "good");
        assert_eq!(mappings[0].extraction.difference_count, 0);

        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("short"));
    }

    #[test]
    fn test_count_only_matches_full_extraction() {
        let sink = CollectingSink::default();
        let records = vec![
            record("r1", 5, "2M1I3M", "ACTGGT", Strand::Forward),
            record("r2", 3, "3M2D4M", "GTATTGC", Strand::Reverse),
        ];
        let full =
            extract_mappings(records.clone(), reference().as_ref(), "chr1", true, &sink).unwrap();
        let counted = extract_mappings(records, reference().as_ref(), "chr1", false, &sink).unwrap();
        for (a, b) in full.iter().zip(&counted) {
            assert_eq!(a.extraction.difference_count, b.extraction.difference_count);
            assert!(b.extraction.diffs.is_empty() && b.extraction.gaps.is_empty());
        }
        assert_eq!(full[0].extraction.difference_count, 1);
        assert_eq!(full[0].extraction.gaps.len(), 1);
    }

    #[test]
    fn test_classify_groups_mates_together() {
        let sink = CollectingSink::default();
        let records = vec![
            record("pair/1", 1, "4M", "ACGT", Strand::Forward),
            record("solo", 10, "4M", "TGCA", Strand::Forward),
            record("pair/2", 9, "4M", "TTGA", Strand::Reverse),
        ];
        let mappings =
            extract_mappings(records, reference().as_ref(), "chr1", false, &sink).unwrap();
        let classified = classify_mappings(mappings).unwrap();

        let summary: Vec<(&str, MappingClass, Option<i64>)> = classified
            .iter()
            .map(|c| {
                (
                    c.mapping.record.read_name.as_str(),
                    c.classification.class,
                    c.classification.next_mapping_start,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("pair/1", MappingClass::SinglePerfectMatch, Some(9)),
                ("pair/2", MappingClass::CommonMatch, Some(1)),
                ("solo", MappingClass::SinglePerfectMatch, None),
            ]
        );
    }

    #[test]
    fn test_load_track_counts_and_filters() {
        let sink = CollectingSink::default();
        let records = vec![
            record("a", 1, "4M", "ACGT", Strand::Forward),
            record("b", 3, "2M2D2M", "GTGG", Strand::Reverse),
            // mapping quality below the filter threshold
            MappingRecord {
                mapping_quality: 3,
                ..record("c", 2, "4M", "CGTA", Strand::Forward)
            },
        ];
        let request = IntervalRequest::new(0, 1, 10)
            .with_diffs_and_gaps(true)
            .with_read_class_filter(ReadClassFilter::all().with_min_mapping_quality(10));
        let aggregator = load_track(
            track("t", records).as_ref(),
            reference().as_ref(),
            "chr1",
            &request,
            &sink,
        )
        .unwrap();

        assert_eq!(aggregator.state(), CoverageState::Ready);
        let counters = aggregator.counters();
        assert_eq!(counters.total(1, Strand::Forward), 1);
        assert_eq!(counters.total(2, Strand::Forward), 1);
        assert_eq!(counters.total(3, Strand::Reverse), 1);
        // deletions count as covered
        assert_eq!(counters.total(5, Strand::Reverse), 1);
        assert_eq!(counters.total(8, Strand::Reverse), 1);
        assert_eq!(counters.total(9, Strand::Reverse), 0);
        assert_eq!(
            counters.count(3, MappingClass::SingleBestMatch, Strand::Reverse),
            1
        );
        assert_eq!(aggregator.gaps().len(), 0);
        assert_eq!(aggregator.diffs().len(), 2);
    }

    #[test]
    fn test_load_coverage_modes() {
        let first = track("first", vec![record("a", 1, "4M", "ACGT", Strand::Forward)]);
        let second = track(
            "second",
            vec![
                record("b", 1, "4M", "ACGT", Strand::Forward),
                record("c", 3, "4M", "GTAC", Strand::Forward),
            ],
        );
        let request = IntervalRequest::new(0, 1, 10);
        let sink = CollectingSink::default();

        let combined = TrackSet::new(
            vec![Arc::clone(&first), Arc::clone(&second)],
            reference(),
            TrackMode::Combined,
        )
        .unwrap();
        match load_coverage(&combined, &request, &sink).unwrap() {
            CoverageResult::Combined(coverage) => {
                assert_eq!(coverage.counters().total(1, Strand::Forward), 2);
                assert_eq!(coverage.counters().total(3, Strand::Forward), 3);
            }
            other => panic!("expected combined coverage, got {other:?}"),
        }

        let double = TrackSet::new(vec![first, second], reference(), TrackMode::Double).unwrap();
        match load_coverage(&double, &request, &sink).unwrap() {
            CoverageResult::Double(coverage) => {
                assert_eq!(coverage.difference(1, Strand::Forward), 0);
                assert_eq!(coverage.difference(3, Strand::Forward), 1);
                assert_eq!(coverage.difference(6, Strand::Forward), 1);
            }
            other => panic!("expected double coverage, got {other:?}"),
        }
    }

    #[test]
    fn test_track_set_validation() {
        let one = track("one", Vec::new());
        assert!(TrackSet::new(Vec::new(), reference(), TrackMode::Combined).is_err());
        assert!(TrackSet::new(vec![one], reference(), TrackMode::Double).is_err());
    }

    #[test]
    fn test_unknown_chromosome_fails_request() {
        let set = TrackSet::new(vec![track("t", Vec::new())], reference(), TrackMode::Combined)
            .unwrap();
        let request = IntervalRequest::new(7, 1, 10);
        assert!(matches!(
            load_coverage(&set, &request, &CollectingSink::default()),
            Err(MappingError::Resource(_))
        ));
    }
}
