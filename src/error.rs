//! Error type shared by the mapping core, the data sources and the scheduler.

use std::io::Error as IoError;

#[derive(Debug)]
pub enum MappingError {
    /// CIGAR grammar violation, unparseable run length or a CIGAR that reaches
    /// past the read or reference it is applied to. The record is skipped.
    MalformedInput(String),
    /// Empty read, out-of-bounds coordinates or start >= stop. The record is skipped.
    ConsistencyViolation(String),
    /// A mapping has fewer differences than the minimum computed for its own
    /// read group. The aggregated statistics cannot be trusted.
    InvariantViolation {
        read_name: String,
        difference_count: usize,
        min_mismatches: usize,
    },
    /// Reference or track unreadable. Fatal for one request only.
    Resource(String),
    /// A track set or request that cannot be served as configured.
    Configuration(String),
    /// The worker behind a scheduler has stopped and no longer accepts requests.
    SchedulerClosed,
}

impl std::fmt::Display for MappingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappingError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            MappingError::ConsistencyViolation(msg) => write!(f, "Inconsistent mapping: {}", msg),
            MappingError::InvariantViolation {
                read_name,
                difference_count,
                min_mismatches,
            } => write!(
                f,
                "Invariant violated for read '{}': {} differences is below the group minimum of {}",
                read_name, difference_count, min_mismatches
            ),
            MappingError::Resource(msg) => write!(f, "Resource error: {}", msg),
            MappingError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            MappingError::SchedulerClosed => write!(f, "Scheduler is no longer running"),
        }
    }
}

impl std::error::Error for MappingError {}

impl From<IoError> for MappingError {
    fn from(e: IoError) -> Self {
        MappingError::Resource(e.to_string())
    }
}

impl From<rust_htslib::errors::Error> for MappingError {
    fn from(e: rust_htslib::errors::Error) -> Self {
        MappingError::Resource(e.to_string())
    }
}

impl MappingError {
    /// Errors that only invalidate the current record, as opposed to the whole request.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            MappingError::MalformedInput(_) | MappingError::ConsistencyViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MappingError>;
