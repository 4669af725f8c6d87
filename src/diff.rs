//! Substitution, deletion and insertion evidence of one mapping against the reference.

use crate::cigar::{CigarKind, CigarOp};
use crate::error::{MappingError, Result};
use rustc_hash::FxHashMap;

/// Base reported for deleted reference positions and gap columns
pub const GAP: u8 = b'_';

/// A single read base that deviates from the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diff {
    pub position: i64,
    pub base: u8,
    pub is_forward_strand: bool,
}

/// A read base inserted before reference position `position`.
///
/// `order` separates consecutive insertions stacked on the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceGap {
    pub position: i64,
    pub base: u8,
    pub order: u32,
    pub is_forward_strand: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffAndGapResult {
    pub diffs: Vec<Diff>,
    pub gaps: Vec<ReferenceGap>,
    pub difference_count: usize,
}

pub fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        _ => base,
    }
}

/// Next free insertion order per reference position. Lives for one extraction only.
#[derive(Default)]
struct GapOrder {
    next: FxHashMap<i64, u32>,
}

impl GapOrder {
    fn next(&mut self, position: i64) -> u32 {
        let slot = self.next.entry(position).or_insert(0);
        let order = *slot;
        *slot += 1;
        order
    }
}

trait DiffVisitor {
    fn mismatch(&mut self, ref_offset: usize, read_base: u8);
    fn deletion(&mut self, ref_offset: usize);
    fn insertion(&mut self, ref_offset: usize, read_base: u8);
}

/// Count-only visitor
struct Tally;

impl DiffVisitor for Tally {
    fn mismatch(&mut self, _: usize, _: u8) {}
    fn deletion(&mut self, _: usize) {}
    fn insertion(&mut self, _: usize, _: u8) {}
}

struct Collector {
    start: i64,
    is_reverse: bool,
    gap_order: GapOrder,
    result: DiffAndGapResult,
}

impl Collector {
    fn strand_base(&self, base: u8) -> u8 {
        if self.is_reverse {
            complement(base)
        } else {
            base
        }
    }
}

impl DiffVisitor for Collector {
    fn mismatch(&mut self, ref_offset: usize, read_base: u8) {
        let base = self.strand_base(read_base);
        self.result.diffs.push(Diff {
            position: self.start + ref_offset as i64,
            base,
            is_forward_strand: !self.is_reverse,
        });
    }

    fn deletion(&mut self, ref_offset: usize) {
        self.result.diffs.push(Diff {
            position: self.start + ref_offset as i64,
            base: GAP,
            is_forward_strand: !self.is_reverse,
        });
    }

    fn insertion(&mut self, ref_offset: usize, read_base: u8) {
        let position = self.start + ref_offset as i64;
        let base = self.strand_base(read_base);
        let order = self.gap_order.next(position);
        self.result.gaps.push(ReferenceGap {
            position,
            base,
            order,
            is_forward_strand: !self.is_reverse,
        });
    }
}

fn base_at(seq: &[u8], index: usize, what: &str) -> Result<u8> {
    seq.get(index)
        .map(|b| b.to_ascii_uppercase())
        .ok_or_else(|| {
            MappingError::MalformedInput(format!(
                "CIGAR reaches {what} offset {index} but the {what} has only {} bases",
                seq.len()
            ))
        })
}

/// Walk the CIGAR, report every difference to `visitor` and return their number.
fn walk<V: DiffVisitor>(
    ops: &[CigarOp],
    read_seq: &[u8],
    ref_seq: &[u8],
    visitor: &mut V,
) -> Result<usize> {
    let mut ref_pos = 0usize;
    let mut read_pos = 0usize;
    let mut count = 0usize;

    for op in ops {
        let len = op.len();
        if len == 0 {
            return Err(MappingError::MalformedInput(format!(
                "Zero-length CIGAR run '{}'",
                op.op()
            )));
        }
        match op.kind() {
            CigarKind::Match => {
                for j in 0..len {
                    let read_base = base_at(read_seq, read_pos + j, "read")?;
                    let ref_base = base_at(ref_seq, ref_pos + j, "reference")?;
                    if read_base != ref_base {
                        visitor.mismatch(ref_pos + j, read_base);
                        count += 1;
                    }
                }
            }
            CigarKind::SeqMismatch => {
                for j in 0..len {
                    let read_base = base_at(read_seq, read_pos + j, "read")?;
                    visitor.mismatch(ref_pos + j, read_base);
                }
                count += len;
            }
            CigarKind::Deletion => {
                for j in 0..len {
                    visitor.deletion(ref_pos + j);
                }
                count += len;
            }
            CigarKind::Insertion => {
                for j in 0..len {
                    let read_base = base_at(read_seq, read_pos + j, "read")?;
                    visitor.insertion(ref_pos, read_base);
                }
                count += len;
            }
            CigarKind::SeqMatch
            | CigarKind::Skip
            | CigarKind::Padding
            | CigarKind::SoftClip
            | CigarKind::HardClip => {}
        }
        ref_pos += op.reference_delta();
        read_pos += op.read_delta();
    }

    Ok(count)
}

/// Extract diffs and gaps of a read aligned at `start`.
///
/// `ref_seq` must begin at `start` and cover every reference base the CIGAR
/// compares against; running past either sequence is a malformed-input error.
/// Bases are compared case-insensitively and reported in upper case,
/// complemented for reverse-strand reads.
pub fn extract_diffs_and_gaps(
    ops: &[CigarOp],
    read_seq: &[u8],
    ref_seq: &[u8],
    is_reverse: bool,
    start: i64,
) -> Result<DiffAndGapResult> {
    let mut collector = Collector {
        start,
        is_reverse,
        gap_order: GapOrder::default(),
        result: DiffAndGapResult::default(),
    };
    let count = walk(ops, read_seq, ref_seq, &mut collector)?;
    collector.result.difference_count = count;
    Ok(collector.result)
}

/// Same count as [`extract_diffs_and_gaps`] without building the records.
pub fn count_diffs_and_gaps(ops: &[CigarOp], read_seq: &[u8], ref_seq: &[u8]) -> Result<usize> {
    walk(ops, read_seq, ref_seq, &mut Tally)
}

/// Diffs and gaps of a pre-gapped read/reference pair of equal length.
///
/// A `_` in the reference is an insertion in the read; `_` in the read is a
/// deletion. The reference position advances on non-gap reference columns only.
pub fn extract_gapped_diffs(
    read_aligned: &[u8],
    ref_aligned: &[u8],
    is_reverse: bool,
    start: i64,
) -> Result<DiffAndGapResult> {
    if read_aligned.len() != ref_aligned.len() {
        return Err(MappingError::MalformedInput(format!(
            "Gapped read ({} columns) and reference ({} columns) differ in length",
            read_aligned.len(),
            ref_aligned.len()
        )));
    }

    let mut collector = Collector {
        start,
        is_reverse,
        gap_order: GapOrder::default(),
        result: DiffAndGapResult::default(),
    };
    let mut ref_offset = 0usize;

    for (&read_base, &ref_base) in read_aligned.iter().zip(ref_aligned) {
        let read_base = read_base.to_ascii_uppercase();
        let ref_base = ref_base.to_ascii_uppercase();
        if ref_base == GAP {
            collector.insertion(ref_offset, read_base);
            collector.result.difference_count += 1;
            continue;
        }
        if read_base != ref_base {
            if read_base == GAP {
                collector.deletion(ref_offset);
            } else {
                collector.mismatch(ref_offset, read_base);
            }
            collector.result.difference_count += 1;
        }
        ref_offset += 1;
    }

    Ok(collector.result)
}
