//! CIGAR decoding and the reference/read coordinate arithmetic built on it.

use crate::error::{MappingError, Result};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

static CIGAR_GRAMMAR: OnceLock<Regex> = OnceLock::new();

/// The nine SAM CIGAR operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CigarKind {
    /// `M`: aligned, may hold mismatches
    Match = 0,
    /// `=`
    SeqMatch = 1,
    /// `X`
    SeqMismatch = 2,
    /// `I`: bases present in the read only
    Insertion = 3,
    /// `D`: bases present in the reference only
    Deletion = 4,
    /// `N`: skipped reference region (intron)
    Skip = 5,
    /// `P`
    Padding = 6,
    /// `S`: present in the read, outside the alignment
    SoftClip = 7,
    /// `H`: absent from the stored read
    HardClip = 8,
}

const KINDS: [CigarKind; 9] = [
    CigarKind::Match,
    CigarKind::SeqMatch,
    CigarKind::SeqMismatch,
    CigarKind::Insertion,
    CigarKind::Deletion,
    CigarKind::Skip,
    CigarKind::Padding,
    CigarKind::SoftClip,
    CigarKind::HardClip,
];

impl CigarKind {
    pub fn from_char(op: char) -> Option<Self> {
        match op {
            'M' => Some(CigarKind::Match),
            '=' => Some(CigarKind::SeqMatch),
            'X' => Some(CigarKind::SeqMismatch),
            'I' => Some(CigarKind::Insertion),
            'D' => Some(CigarKind::Deletion),
            'N' => Some(CigarKind::Skip),
            'P' => Some(CigarKind::Padding),
            'S' => Some(CigarKind::SoftClip),
            'H' => Some(CigarKind::HardClip),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            CigarKind::Match => 'M',
            CigarKind::SeqMatch => '=',
            CigarKind::SeqMismatch => 'X',
            CigarKind::Insertion => 'I',
            CigarKind::Deletion => 'D',
            CigarKind::Skip => 'N',
            CigarKind::Padding => 'P',
            CigarKind::SoftClip => 'S',
            CigarKind::HardClip => 'H',
        }
    }

    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarKind::Match
                | CigarKind::SeqMatch
                | CigarKind::SeqMismatch
                | CigarKind::Deletion
                | CigarKind::Skip
                | CigarKind::Padding
        )
    }

    /// Hard clips never consume read bases: they are not in the stored sequence.
    pub fn consumes_read(self) -> bool {
        matches!(
            self,
            CigarKind::Match
                | CigarKind::SeqMatch
                | CigarKind::SeqMismatch
                | CigarKind::Insertion
                | CigarKind::SoftClip
        )
    }
}

const LEN_BITS: u32 = 28;
const LEN_MASK: u32 = (1 << LEN_BITS) - 1;

/// Longest run a single operation can carry
pub const MAX_RUN_LENGTH: u32 = LEN_MASK;

/// One CIGAR run. The operation lives in the four most significant bits and
/// the run length in the remaining 28.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    val: u32,
}

impl CigarOp {
    /// `len` is truncated to [`MAX_RUN_LENGTH`]; [`parse_cigar`] rejects longer runs.
    pub fn new(len: u32, kind: CigarKind) -> Self {
        Self {
            val: ((kind as u32) << LEN_BITS) | (len & LEN_MASK),
        }
    }

    pub fn kind(&self) -> CigarKind {
        KINDS[(self.val >> LEN_BITS) as usize]
    }

    pub fn op(&self) -> char {
        self.kind().as_char()
    }

    pub fn len(&self) -> usize {
        (self.val & LEN_MASK) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reference_delta(&self) -> usize {
        if self.kind().consumes_reference() {
            self.len()
        } else {
            0
        }
    }

    pub fn read_delta(&self) -> usize {
        if self.kind().consumes_read() {
            self.len()
        } else {
            0
        }
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len(), self.op())
    }
}

/// Check a CIGAR string against `^([0-9]+[MIDNSHPX=])+$`.
///
/// This is the wire-format check only; zero-length runs pass it and are
/// rejected later by [`parse_cigar`].
pub fn is_valid_cigar(cigar: &str) -> bool {
    CIGAR_GRAMMAR
        .get_or_init(|| Regex::new(r"^([0-9]+[MIDNSHPX=])+$").unwrap())
        .is_match(cigar)
}

/// Parse a CIGAR string into its runs.
pub fn parse_cigar(cigar: &str) -> Result<Vec<CigarOp>> {
    if cigar.is_empty() {
        return Err(MappingError::MalformedInput("Empty CIGAR string".to_string()));
    }

    let mut ops = Vec::new();
    let mut len: u64 = 0;
    let mut has_digits = false;

    for c in cigar.chars() {
        if let Some(digit) = c.to_digit(10) {
            len = len * 10 + digit as u64;
            if len > MAX_RUN_LENGTH as u64 {
                return Err(MappingError::MalformedInput(format!(
                    "CIGAR run length exceeds {MAX_RUN_LENGTH} in '{cigar}'"
                )));
            }
            has_digits = true;
            continue;
        }

        let kind = CigarKind::from_char(c).ok_or_else(|| {
            MappingError::MalformedInput(format!(
                "Unsupported CIGAR operation '{c}' in '{cigar}'"
            ))
        })?;
        if !has_digits {
            return Err(MappingError::MalformedInput(format!(
                "CIGAR operation '{c}' without run length in '{cigar}'"
            )));
        }
        if len == 0 {
            return Err(MappingError::MalformedInput(format!(
                "Zero-length CIGAR run '{c}' in '{cigar}'"
            )));
        }

        ops.push(CigarOp::new(len as u32, kind));
        len = 0;
        has_digits = false;
    }

    if has_digits {
        return Err(MappingError::MalformedInput(format!(
            "CIGAR string '{cigar}' ends with a run length but no operation"
        )));
    }

    Ok(ops)
}

pub fn format_cigar(ops: &[CigarOp]) -> String {
    ops.iter().map(|op| op.to_string()).collect()
}

/// Number of reference bases spanned by the alignment
pub fn reference_length(ops: &[CigarOp]) -> usize {
    ops.iter().map(CigarOp::reference_delta).sum()
}

/// Number of bases the stored read sequence must have
pub fn read_length(ops: &[CigarOp]) -> usize {
    ops.iter().map(CigarOp::read_delta).sum()
}

/// Inclusive stop position of an alignment starting at `start`.
pub fn alignment_stop(start: i64, ops: &[CigarOp]) -> i64 {
    start + reference_length(ops) as i64 - 1
}

/// Inclusive reference ranges actually covered by read bases or deletions.
///
/// Adjacent M/=/X/D runs are joined; N and P runs split blocks.
pub fn aligned_blocks(start: i64, ops: &[CigarOp]) -> Vec<(i64, i64)> {
    let mut blocks: Vec<(i64, i64)> = Vec::new();
    let mut ref_pos = start;
    let mut open = false;

    for op in ops {
        let len = op.reference_delta() as i64;
        match op.kind() {
            CigarKind::Match | CigarKind::SeqMatch | CigarKind::SeqMismatch | CigarKind::Deletion => {
                match blocks.last_mut() {
                    Some(last) if open => last.1 = ref_pos + len - 1,
                    _ => blocks.push((ref_pos, ref_pos + len - 1)),
                }
                open = true;
            }
            CigarKind::Skip | CigarKind::Padding => open = false,
            CigarKind::Insertion | CigarKind::SoftClip | CigarKind::HardClip => {}
        }
        ref_pos += len;
    }

    blocks
}
