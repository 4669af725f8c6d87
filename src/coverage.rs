//! Per-position, per-strand, per-class coverage over an interval and the
//! combination of several tracks' coverage.

use crate::alignment_record::Strand;
use crate::classify::MappingClass;
use crate::diff::{DiffAndGapResult, Diff, ReferenceGap};
use crate::error::{MappingError, Result};
use crate::request::{IntervalRequest, ReadClassFilter};
use std::cmp::{max, min};

const BUCKETS: usize = MappingClass::COUNT * 2;

#[inline]
fn bucket(class: MappingClass, strand: Strand) -> usize {
    class.index() * 2 + strand.index()
}

/// Read counts over the inclusive interval `[left, right]`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoverageCounters {
    left: i64,
    right: i64,
    counts: Vec<[u32; BUCKETS]>,
}

impl CoverageCounters {
    /// Zeroed counters over `[left, right]`; empty if `right < left`.
    pub fn new(left: i64, right: i64) -> Self {
        if right < left {
            return Self::default();
        }
        Self {
            left,
            right,
            counts: vec![[0; BUCKETS]; (right - left + 1) as usize],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Inclusive bounds; `(0, 0)` when empty
    pub fn bounds(&self) -> (i64, i64) {
        (self.left, self.right)
    }

    fn slot(&self, position: i64) -> Option<usize> {
        if self.is_empty() || position < self.left || position > self.right {
            None
        } else {
            Some((position - self.left) as usize)
        }
    }

    /// Count one read over `[from, to]`, clipped to the counter bounds.
    pub fn add_range(&mut self, from: i64, to: i64, class: MappingClass, strand: Strand) {
        if self.is_empty() {
            return;
        }
        let from = max(from, self.left);
        let to = min(to, self.right);
        let b = bucket(class, strand);
        for position in from..=to {
            self.counts[(position - self.left) as usize][b] += 1;
        }
    }

    pub fn count(&self, position: i64, class: MappingClass, strand: Strand) -> u32 {
        self.slot(position)
            .map_or(0, |i| self.counts[i][bucket(class, strand)])
    }

    /// Reads of any class on `strand` covering `position`
    pub fn total(&self, position: i64, strand: Strand) -> u32 {
        MappingClass::ALL
            .iter()
            .map(|&class| self.count(position, class, strand))
            .sum()
    }

    /// Sum two counters. Bounds become the union; positions covered by
    /// neither operand stay zero.
    pub fn merge(self, other: &CoverageCounters) -> CoverageCounters {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other.clone();
        }

        let mut merged = CoverageCounters::new(min(self.left, other.left), max(self.right, other.right));
        for source in [&self, other] {
            let offset = (source.left - merged.left) as usize;
            for (i, counts) in source.counts.iter().enumerate() {
                let target = &mut merged.counts[offset + i];
                for b in 0..BUCKETS {
                    target[b] += counts[b];
                }
            }
        }
        merged
    }
}

/// Lifecycle of a cached coverage result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageState {
    Empty,
    Loading,
    Ready,
}

/// Coverage of one chromosome window, optionally with the diffs and gaps of
/// the contributing mappings.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageAggregator {
    state: CoverageState,
    chromosome_id: u32,
    total_from: i64,
    total_to: i64,
    diffs_loaded: bool,
    read_class_filter: ReadClassFilter,
    counters: CoverageCounters,
    diffs: Vec<Diff>,
    gaps: Vec<ReferenceGap>,
}

impl Default for CoverageAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl CoverageAggregator {
    pub fn new() -> Self {
        Self {
            state: CoverageState::Empty,
            chromosome_id: 0,
            total_from: 0,
            total_to: 0,
            diffs_loaded: false,
            read_class_filter: ReadClassFilter::default(),
            counters: CoverageCounters::default(),
            diffs: Vec::new(),
            gaps: Vec::new(),
        }
    }

    /// Fresh aggregator in `Loading` state for the padded window of `request`
    pub fn loading(request: &IntervalRequest) -> Self {
        Self {
            state: CoverageState::Loading,
            chromosome_id: request.chromosome_id,
            total_from: request.total_from,
            total_to: request.total_to,
            diffs_loaded: request.wants_diffs_and_gaps,
            read_class_filter: request.read_class_filter,
            counters: CoverageCounters::new(request.total_from, request.total_to),
            diffs: Vec::new(),
            gaps: Vec::new(),
        }
    }

    pub fn state(&self) -> CoverageState {
        self.state
    }

    pub fn chromosome_id(&self) -> u32 {
        self.chromosome_id
    }

    pub fn bounds(&self) -> (i64, i64) {
        (self.total_from, self.total_to)
    }

    pub fn has_diffs_and_gaps(&self) -> bool {
        self.diffs_loaded
    }

    pub fn read_class_filter(&self) -> ReadClassFilter {
        self.read_class_filter
    }

    pub fn counters(&self) -> &CoverageCounters {
        &self.counters
    }

    pub fn diffs(&self) -> &[Diff] {
        &self.diffs
    }

    pub fn gaps(&self) -> &[ReferenceGap] {
        &self.gaps
    }

    /// Count one mapping over its aligned blocks.
    pub fn add_mapping(&mut self, blocks: &[(i64, i64)], class: MappingClass, strand: Strand) {
        for &(from, to) in blocks {
            self.counters.add_range(from, to, class, strand);
        }
    }

    /// Keep the diffs and gaps of one mapping that fall inside the window.
    /// Ignored unless diffs and gaps were requested.
    pub fn add_diffs_and_gaps(&mut self, result: &DiffAndGapResult) {
        if !self.diffs_loaded {
            return;
        }
        let (from, to) = (self.total_from, self.total_to);
        self.diffs
            .extend(result.diffs.iter().filter(|d| d.position >= from && d.position <= to));
        self.gaps
            .extend(result.gaps.iter().filter(|g| g.position >= from && g.position <= to));
    }

    /// The alignment source has been fully scanned.
    pub fn finish(&mut self) {
        self.diffs.sort_by_key(|d| d.position);
        self.gaps.sort_by_key(|g| (g.position, g.order));
        self.state = CoverageState::Ready;
    }

    /// Whether this result can answer `request` without refetching: it is
    /// ready, on the same chromosome, spans the visible window, holds diffs
    /// and gaps if the request wants them and was built with the same filter.
    pub fn covers_bounds(&self, request: &IntervalRequest) -> bool {
        self.state == CoverageState::Ready
            && self.chromosome_id == request.chromosome_id
            && self.total_from <= request.from
            && request.to <= self.total_to
            && (self.diffs_loaded || !request.wants_diffs_and_gaps)
            && self.read_class_filter == request.read_class_filter
    }

    /// Sum `other` into this result. Bounds become the union; diffs and
    /// gaps are kept only if both operands carry them. Results of different
    /// chromosomes or read class filters cannot be summed.
    pub fn merge(self, other: &CoverageAggregator) -> Result<CoverageAggregator> {
        if other.state == CoverageState::Empty {
            return Ok(self);
        }
        if self.state == CoverageState::Empty {
            return Ok(other.clone());
        }
        if self.chromosome_id != other.chromosome_id {
            return Err(MappingError::Configuration(format!(
                "Cannot merge coverage of chromosome {} into chromosome {}",
                other.chromosome_id, self.chromosome_id
            )));
        }
        if self.read_class_filter != other.read_class_filter {
            return Err(MappingError::Configuration(
                "Cannot merge coverage built with different read class filters".to_string(),
            ));
        }

        let diffs_loaded = self.diffs_loaded && other.diffs_loaded;
        let mut diffs = Vec::new();
        let mut gaps = Vec::new();
        if diffs_loaded {
            diffs = self.diffs;
            diffs.extend_from_slice(&other.diffs);
            diffs.sort_by_key(|d| d.position);
            gaps = self.gaps;
            gaps.extend_from_slice(&other.gaps);
            gaps.sort_by_key(|g| (g.position, g.order));
        }

        let state = if self.state == CoverageState::Ready && other.state == CoverageState::Ready {
            CoverageState::Ready
        } else {
            CoverageState::Loading
        };

        Ok(CoverageAggregator {
            state,
            chromosome_id: self.chromosome_id,
            total_from: min(self.total_from, other.total_from),
            total_to: max(self.total_to, other.total_to),
            diffs_loaded,
            read_class_filter: self.read_class_filter,
            counters: self.counters.merge(&other.counters),
            diffs,
            gaps,
        })
    }

    /// Fold several tracks into one result whose counts are the sums.
    pub fn combine_tracks<I: IntoIterator<Item = CoverageAggregator>>(
        tracks: I,
    ) -> Result<CoverageAggregator> {
        tracks
            .into_iter()
            .try_fold(CoverageAggregator::new(), |acc, track| acc.merge(&track))
    }
}

/// Two tracks kept apart, plus the absolute difference of their totals per
/// position and strand.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoTrackCoverage {
    pub first: CoverageAggregator,
    pub second: CoverageAggregator,
    left: i64,
    difference: Vec<[u32; 2]>,
}

impl TwoTrackCoverage {
    pub fn new(first: CoverageAggregator, second: CoverageAggregator) -> Self {
        let bounds = CoverageCounters::default()
            .merge(first.counters())
            .merge(second.counters());
        let (left, right) = bounds.bounds();
        let difference = if bounds.is_empty() {
            Vec::new()
        } else {
            (left..=right)
                .map(|position| {
                    let mut diff = [0u32; 2];
                    for strand in Strand::BOTH {
                        diff[strand.index()] = first
                            .counters()
                            .total(position, strand)
                            .abs_diff(second.counters().total(position, strand));
                    }
                    diff
                })
                .collect()
        };

        Self {
            first,
            second,
            left,
            difference,
        }
    }

    pub fn difference(&self, position: i64, strand: Strand) -> u32 {
        if position < self.left {
            return 0;
        }
        self.difference
            .get((position - self.left) as usize)
            .map_or(0, |d| d[strand.index()])
    }

    pub fn covers_bounds(&self, request: &IntervalRequest) -> bool {
        self.first.covers_bounds(request) && self.second.covers_bounds(request)
    }
}

/// What a track set delivers for one request
#[derive(Debug, Clone, PartialEq)]
pub enum CoverageResult {
    /// One track, or several tracks summed
    Combined(CoverageAggregator),
    /// Two tracks side by side
    Double(TwoTrackCoverage),
}

impl CoverageResult {
    pub fn covers_bounds(&self, request: &IntervalRequest) -> bool {
        match self {
            CoverageResult::Combined(coverage) => coverage.covers_bounds(request),
            CoverageResult::Double(coverage) => coverage.covers_bounds(request),
        }
    }
}
