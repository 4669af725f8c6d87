//! Alignment tracks the coverage pipeline reads from.
//!
//! File-backed tracks open their file on every fetch and close it before
//! returning, so no handle is held between requests.

use crate::alignment_record::{AlignmentFormat, MappingRecord, Strand};
use crate::consistency::MessageSink;
use crate::error::{MappingError, Result};
use crate::sam::{open_sam_reader, parse_sam};
use coitrees::{BasicCOITree, Interval, IntervalTree};
use log::debug;
use rust_htslib::bam::{self, Read as _};
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub trait AlignmentSource: Send + Sync {
    /// Display name of the track
    fn name(&self) -> &str;

    /// Every mapping on `chromosome` overlapping the inclusive window `[from, to]`.
    ///
    /// All mappings of a read that touch the window are returned by one call.
    /// Records that cannot be read are reported to `sink` and left out.
    fn fetch(
        &self,
        chromosome: &str,
        from: i64,
        to: i64,
        sink: &dyn MessageSink,
    ) -> Result<Vec<MappingRecord>>;

    /// Whether every fetch has to decompress the file from the start
    fn is_compressed(&self) -> bool {
        false
    }
}

/// Open a track by file extension. CRAM files are decoded against
/// `reference_fasta` and cannot be opened without it.
pub fn open_track(path: &str, reference_fasta: Option<&str>) -> Result<Arc<dyn AlignmentSource>> {
    match AlignmentFormat::from_path(path) {
        Some(AlignmentFormat::Hts) if path.ends_with(".cram") => match reference_fasta {
            Some(fasta) => Ok(Arc::new(HtsTrack::new(path).with_reference(fasta))),
            None => Err(MappingError::Configuration(format!(
                "CRAM file '{}' needs a reference FASTA",
                path
            ))),
        },
        Some(AlignmentFormat::Hts) => Ok(Arc::new(HtsTrack::new(path))),
        Some(AlignmentFormat::Sam) => Ok(Arc::new(SamTrack::new(path))),
        None => Err(MappingError::Resource(format!(
            "Unsupported alignment file '{}': expected .bam, .cram, .sam or .sam.gz",
            path
        ))),
    }
}

/// Coordinate-sorted, indexed BAM or CRAM file
#[derive(Debug, Clone)]
pub struct HtsTrack {
    path: String,
    reference_fasta: Option<String>,
}

impl HtsTrack {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            reference_fasta: None,
        }
    }

    /// FASTA the file's sequences are decoded against (required for CRAM)
    pub fn with_reference(mut self, fasta: &str) -> Self {
        self.reference_fasta = Some(fasta.to_string());
        self
    }
}

fn convert_record(record: &bam::Record, chromosome: &str) -> MappingRecord {
    let cigar = record.cigar();
    let pair_tag = if !record.is_paired() {
        None
    } else if record.is_first_in_template() {
        Some(b'1')
    } else if record.is_last_in_template() {
        Some(b'2')
    } else {
        None
    };

    MappingRecord {
        read_name: String::from_utf8_lossy(record.qname()).into_owned(),
        pair_tag,
        reference_name: chromosome.to_string(),
        alignment_start: record.pos() + 1,
        // end_pos is 0-based exclusive, which equals the 1-based inclusive stop
        alignment_end: cigar.end_pos(),
        strand: Strand::from_reverse_flag(record.is_reverse()),
        mapping_quality: record.mapq(),
        cigar: cigar.to_string(),
        read_sequence: record.seq().as_bytes(),
    }
}

impl AlignmentSource for HtsTrack {
    fn name(&self) -> &str {
        &self.path
    }

    fn fetch(
        &self,
        chromosome: &str,
        from: i64,
        to: i64,
        sink: &dyn MessageSink,
    ) -> Result<Vec<MappingRecord>> {
        let mut reader = bam::IndexedReader::from_path(&self.path)?;
        if let Some(fasta) = &self.reference_fasta {
            reader.set_reference(fasta)?;
        }
        let tid = reader
            .header()
            .tid(chromosome.as_bytes())
            .ok_or_else(|| {
                MappingError::Resource(format!(
                    "Chromosome '{}' not found in '{}'",
                    chromosome, self.path
                ))
            })?;
        reader.fetch((tid, from - 1, to))?;

        let mut records = Vec::new();
        for (i, result) in reader.records().enumerate() {
            match result {
                Ok(record) if record.is_unmapped() => {}
                Ok(record) => records.push(convert_record(&record, chromosome)),
                // the reader cannot resync after a bad record
                Err(e) => {
                    sink.send_message(&format!(
                        "Stopped reading '{}' after {} records in {}:{}-{}: {}",
                        self.path, i, chromosome, from, to, e
                    ));
                    return Err(e.into());
                }
            }
        }
        debug!(
            "Fetched {} mappings from {} at {}:{}-{}",
            records.len(),
            self.path,
            chromosome,
            from,
            to
        );
        Ok(records)
    }
}

/// SAM text file, plain or BGZF-compressed. Scanned from the start on every fetch.
#[derive(Debug, Clone)]
pub struct SamTrack {
    path: String,
}

impl SamTrack {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }
}

impl AlignmentSource for SamTrack {
    fn name(&self) -> &str {
        &self.path
    }

    fn is_compressed(&self) -> bool {
        [".gz", ".bgz"].iter().any(|e| self.path.ends_with(e))
    }

    fn fetch(
        &self,
        chromosome: &str,
        from: i64,
        to: i64,
        sink: &dyn MessageSink,
    ) -> Result<Vec<MappingRecord>> {
        let reader = open_sam_reader(&self.path).map_err(|e| {
            MappingError::Resource(format!("Failed to open '{}': {}", self.path, e))
        })?;
        let records = parse_sam(reader, chromosome, from, to, sink)?;
        debug!(
            "Fetched {} mappings from {} at {}:{}-{}",
            records.len(),
            self.path,
            chromosome,
            from,
            to
        );
        Ok(records)
    }
}

type TreeMap = FxHashMap<String, BasicCOITree<usize, u32>>;

/// Interval trees index with `i32`; coordinates beyond it saturate and the
/// exact overlap is checked on the `i64` record afterwards.
fn tree_coordinate(position: i64) -> i32 {
    position.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Mappings held in memory, indexed per chromosome with interval trees
pub struct InMemoryTrack {
    name: String,
    records: Vec<MappingRecord>,
    trees: TreeMap,
}

impl InMemoryTrack {
    pub fn new(name: &str, records: Vec<MappingRecord>) -> Self {
        let mut intervals: FxHashMap<String, Vec<Interval<usize>>> = FxHashMap::default();
        for (i, record) in records.iter().enumerate() {
            intervals
                .entry(record.reference_name.clone())
                .or_default()
                .push(Interval {
                    first: tree_coordinate(record.alignment_start),
                    last: tree_coordinate(record.alignment_end.max(record.alignment_start)),
                    metadata: i,
                });
        }

        let trees: TreeMap = intervals
            .into_iter()
            .map(|(chromosome, nodes)| (chromosome, BasicCOITree::new(nodes.as_slice())))
            .collect();

        Self {
            name: name.to_string(),
            records,
            trees,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AlignmentSource for InMemoryTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(
        &self,
        chromosome: &str,
        from: i64,
        to: i64,
        _sink: &dyn MessageSink,
    ) -> Result<Vec<MappingRecord>> {
        let mut hits: Vec<usize> = Vec::new();
        if let Some(tree) = self.trees.get(chromosome) {
            tree.query(tree_coordinate(from), tree_coordinate(to), |interval| {
                hits.push(interval.metadata.clone());
            });
        }
        // Keep input order regardless of tree layout
        hits.sort_unstable();
        Ok(hits
            .into_iter()
            .map(|i| &self.records[i])
            .filter(|r| r.alignment_start <= to && r.alignment_end.max(r.alignment_start) >= from)
            .cloned()
            .collect())
    }
}
