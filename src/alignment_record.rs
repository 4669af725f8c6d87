/// One mapping of a read as delivered by an alignment source
///
/// ## Field interpretation:
/// - `alignment_start` / `alignment_end`: 1-based, inclusive reference coordinates
/// - `read_sequence`: the stored read bases (hard-clipped bases are absent)
/// - `pair_tag`: `Some(b'1')` / `Some(b'2')` for the first / second mate of a pair
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRecord {
    pub read_name: String,
    pub pair_tag: Option<u8>,
    pub reference_name: String,
    pub alignment_start: i64,
    pub alignment_end: i64,
    pub strand: Strand,
    pub mapping_quality: u8,
    pub cigar: String,
    pub read_sequence: Vec<u8>,
}

/// Strand orientation for alignments
#[derive(Default, PartialEq, Eq, Clone, Copy, Debug, Hash)]
#[repr(u8)]
pub enum Strand {
    #[default]
    Forward,
    Reverse,
}

impl Strand {
    pub const BOTH: [Strand; 2] = [Strand::Forward, Strand::Reverse];

    pub fn from_reverse_flag(is_reverse: bool) -> Self {
        if is_reverse {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn symbol(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

impl MappingRecord {
    pub fn is_reverse_strand(&self) -> bool {
        self.strand == Strand::Reverse
    }
}

/// Alignment file format types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlignmentFormat {
    /// Indexed BAM or CRAM, read through htslib
    Hts,
    /// SAM text, plain or BGZF-compressed
    Sam,
}

impl AlignmentFormat {
    /// Detect format from file extension
    pub fn from_path(path: &str) -> Option<Self> {
        if path.ends_with(".bam") || path.ends_with(".cram") {
            Some(AlignmentFormat::Hts)
        } else if path.ends_with(".sam") || path.ends_with(".sam.gz") || path.ends_with(".sam.bgz") {
            Some(AlignmentFormat::Sam)
        } else {
            None
        }
    }
}
