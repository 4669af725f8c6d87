use std::io;

use crate::faidx::FastaIndex;
use rustc_hash::FxHashMap;

// Trait for reference fetching from different sources.
// Coordinates are 1-based and inclusive on both ends.
pub trait ReferenceSource: Send + Sync {
    fn fetch_sequence(&self, seq_name: &str, start: i64, stop: i64) -> io::Result<Vec<u8>>;

    fn sequence_length(&self, seq_name: &str) -> io::Result<usize>;

    /// Every (name, length) pair the source knows about, in no particular order
    fn sequence_lengths(&self) -> Vec<(String, usize)>;
}

const FASTA_EXTENSIONS: [&str; 6] = [".fa", ".fasta", ".fna", ".fa.gz", ".fasta.gz", ".fna.gz"];

/// Longest known FASTA extension of `path`, if any
fn fasta_extension(path: &str) -> Option<&'static str> {
    FASTA_EXTENSIONS
        .iter()
        .filter(|ext| path.ends_with(*ext))
        .max_by_key(|ext| ext.len())
        .copied()
}

/// Open the FASTA files of a reference. All files must share one extension.
pub fn open_reference(files: &[String]) -> io::Result<FastaIndex> {
    let Some(first) = files.first() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "No reference files provided",
        ));
    };

    let extension = fasta_extension(first).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Unsupported reference file '{first}': expected .fa/.fasta/.fna, optionally bgzipped"),
        )
    })?;
    if let Some(other) = files.iter().find(|f| fasta_extension(f) != Some(extension)) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Mixed reference file types: '{first}' and '{other}'"),
        ));
    }

    FastaIndex::build_from_files(files)
}

impl ReferenceSource for FastaIndex {
    fn fetch_sequence(&self, seq_name: &str, start: i64, stop: i64) -> io::Result<Vec<u8>> {
        FastaIndex::fetch_sequence(self, seq_name, start, stop)
    }

    fn sequence_length(&self, seq_name: &str) -> io::Result<usize> {
        self.get_sequence_length(seq_name)
    }

    fn sequence_lengths(&self) -> Vec<(String, usize)> {
        self.sequence_lengths
            .iter()
            .map(|(name, &len)| (name.clone(), len))
            .collect()
    }
}

/// Reference held in memory, mostly for tests and small genomes
#[derive(Debug, Default, Clone)]
pub struct InMemoryReference {
    sequences: FxHashMap<String, Vec<u8>>,
}

impl InMemoryReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, sequence: &[u8]) {
        self.sequences
            .insert(name.to_string(), sequence.to_ascii_uppercase());
    }
}

impl ReferenceSource for InMemoryReference {
    fn fetch_sequence(&self, seq_name: &str, start: i64, stop: i64) -> io::Result<Vec<u8>> {
        let sequence = self.sequences.get(seq_name).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Sequence '{seq_name}' not found"),
            )
        })?;
        if start < 1 || stop > sequence.len() as i64 || start > stop {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Range {start}-{stop} is outside '{seq_name}' (length {})",
                    sequence.len()
                ),
            ));
        }
        Ok(sequence[(start - 1) as usize..stop as usize].to_vec())
    }

    fn sequence_length(&self, seq_name: &str) -> io::Result<usize> {
        self.sequences.get(seq_name).map(Vec::len).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Sequence '{seq_name}' not found"),
            )
        })
    }

    fn sequence_lengths(&self) -> Vec<(String, usize)> {
        self.sequences
            .iter()
            .map(|(name, seq)| (name.clone(), seq.len()))
            .collect()
    }
}
