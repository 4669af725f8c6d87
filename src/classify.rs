//! Classification of each mapping of a read relative to all other mappings of
//! the same read.
//!
//! Classification needs the whole group, so it runs in two phases:
//! [`ReadGroups::collect`] buffers every mapping by read identity, then
//! [`classify_group`] tags one complete group at a time.

use crate::error::{MappingError, Result};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MappingClass {
    /// No differences, and the only such mapping of the read
    SinglePerfectMatch,
    PerfectMatch,
    /// Fewest (non-zero) differences, and the only such mapping of the read
    SingleBestMatch,
    BestMatch,
    /// More differences than the best mapping of the read
    CommonMatch,
}

impl MappingClass {
    pub const COUNT: usize = 5;

    pub const ALL: [MappingClass; MappingClass::COUNT] = [
        MappingClass::SinglePerfectMatch,
        MappingClass::PerfectMatch,
        MappingClass::SingleBestMatch,
        MappingClass::BestMatch,
        MappingClass::CommonMatch,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            MappingClass::SinglePerfectMatch => "single_perfect",
            MappingClass::PerfectMatch => "perfect",
            MappingClass::SingleBestMatch => "single_best",
            MappingClass::BestMatch => "best",
            MappingClass::CommonMatch => "common",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        MappingClass::ALL.into_iter().find(|class| class.name() == name)
    }
}

/// Distribution of difference counts over one read group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationHistogram {
    pub min_mismatches: usize,
    pub mismatch_count_to_occurrences: FxHashMap<usize, usize>,
}

impl ClassificationHistogram {
    /// Build the histogram; `None` for an empty group.
    pub fn from_counts<I: IntoIterator<Item = usize>>(counts: I) -> Option<Self> {
        let mut mismatch_count_to_occurrences: FxHashMap<usize, usize> = FxHashMap::default();
        let mut min_mismatches: Option<usize> = None;

        for count in counts {
            *mismatch_count_to_occurrences.entry(count).or_insert(0) += 1;
            min_mismatches = Some(min_mismatches.map_or(count, |m| m.min(count)));
        }

        min_mismatches.map(|min_mismatches| Self {
            min_mismatches,
            mismatch_count_to_occurrences,
        })
    }

    /// Number of mappings in the group with `difference_count` differences
    pub fn occurrences(&self, difference_count: usize) -> usize {
        self.mismatch_count_to_occurrences
            .get(&difference_count)
            .copied()
            .unwrap_or(1)
    }

    /// Class of a mapping with `difference_count` differences within this group.
    ///
    /// A count below the group minimum means the histogram was built from
    /// different data than it is applied to, and is reported as an
    /// [`MappingError::InvariantViolation`].
    pub fn classify(&self, read_name: &str, difference_count: usize) -> Result<MappingClass> {
        if difference_count < self.min_mismatches {
            return Err(MappingError::InvariantViolation {
                read_name: read_name.to_string(),
                difference_count,
                min_mismatches: self.min_mismatches,
            });
        }

        let single = self.occurrences(difference_count) == 1;
        let class = if difference_count == 0 {
            if single {
                MappingClass::SinglePerfectMatch
            } else {
                MappingClass::PerfectMatch
            }
        } else if difference_count == self.min_mismatches {
            if single {
                MappingClass::SingleBestMatch
            } else {
                MappingClass::BestMatch
            }
        } else {
            MappingClass::CommonMatch
        };

        Ok(class)
    }
}

/// What the classifier needs to know about one mapping
pub trait Classifiable {
    fn read_name(&self) -> &str;
    fn difference_count(&self) -> usize;
    fn alignment_start(&self) -> i64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: MappingClass,
    /// Mappings of the same read sharing this mapping's difference count
    pub occurrences: usize,
    /// Start of the read's next mapping position; wraps around to the first
    pub next_mapping_start: Option<i64>,
}

/// Read name with a `/1` or `/2` mate suffix removed
pub fn read_identity(read_name: &str) -> &str {
    read_name
        .strip_suffix("/1")
        .or_else(|| read_name.strip_suffix("/2"))
        .unwrap_or(read_name)
}

/// All mappings of one read
#[derive(Debug, Clone)]
pub struct ReadGroup<T> {
    pub read_identity: String,
    pub members: Vec<T>,
}

/// Mappings buffered by read identity, groups kept in first-seen order
#[derive(Debug)]
pub struct ReadGroups<T> {
    groups: Vec<ReadGroup<T>>,
    index: FxHashMap<String, usize>,
}

impl<T: Classifiable> ReadGroups<T> {
    pub fn collect<I: IntoIterator<Item = T>>(mappings: I) -> Self {
        let mut groups: Vec<ReadGroup<T>> = Vec::new();
        let mut index: FxHashMap<String, usize> = FxHashMap::default();

        for mapping in mappings {
            let identity = read_identity(mapping.read_name());
            match index.get(identity) {
                Some(&i) => groups[i].members.push(mapping),
                None => {
                    index.insert(identity.to_string(), groups.len());
                    groups.push(ReadGroup {
                        read_identity: identity.to_string(),
                        members: vec![mapping],
                    });
                }
            }
        }

        Self { groups, index }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, read_identity: &str) -> Option<&ReadGroup<T>> {
        self.index.get(read_identity).map(|&i| &self.groups[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReadGroup<T>> {
        self.groups.iter()
    }
}

impl<T> IntoIterator for ReadGroups<T> {
    type Item = ReadGroup<T>;
    type IntoIter = std::vec::IntoIter<ReadGroup<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

/// Classify every member of a complete read group, in member order.
pub fn classify_group<T: Classifiable>(group: &ReadGroup<T>) -> Result<Vec<Classification>> {
    let histogram = match ClassificationHistogram::from_counts(
        group.members.iter().map(Classifiable::difference_count),
    ) {
        Some(histogram) => histogram,
        None => return Ok(Vec::new()),
    };

    let mut starts: Vec<i64> = group.members.iter().map(Classifiable::alignment_start).collect();
    starts.sort_unstable();
    starts.dedup();

    group
        .members
        .iter()
        .map(|member| {
            let difference_count = member.difference_count();
            let class = histogram.classify(member.read_name(), difference_count)?;
            Ok(Classification {
                class,
                occurrences: histogram.occurrences(difference_count),
                next_mapping_start: next_start(&starts, member.alignment_start()),
            })
        })
        .collect()
}

fn next_start(sorted_starts: &[i64], start: i64) -> Option<i64> {
    if sorted_starts.len() < 2 {
        return None;
    }
    let i = match sorted_starts.binary_search(&start) {
        Ok(pos) => pos + 1,
        Err(pos) => pos,
    };
    Some(sorted_starts[i % sorted_starts.len()])
}
