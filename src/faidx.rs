use rust_htslib::faidx;
use rustc_hash::FxHashMap;
use std::io::{self};

// Sequences spread over one or more FASTA files. Readers are opened per
// fetch and dropped right after, so no file handle outlives a request.
#[derive(Debug)]
pub struct FastaIndex {
    pub fasta_paths: Vec<String>,
    pub sequence_to_file: FxHashMap<String, usize>,
    pub sequence_lengths: FxHashMap<String, usize>,
}

/// (name, length) of every entry of a .fai file
fn parse_fai(content: &str) -> Vec<(&str, usize)> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next().filter(|name| !name.is_empty())?;
            let length = fields.next()?.parse::<usize>().ok()?;
            Some((name, length))
        })
        .collect()
}

/// Contents of the .fai next to `fasta_path`, created through htslib if missing
fn read_or_build_fai(fasta_path: &str) -> io::Result<String> {
    let fai_path = format!("{fasta_path}.fai");
    if let Ok(content) = std::fs::read_to_string(&fai_path) {
        return Ok(content);
    }
    faidx::Reader::from_path(fasta_path).map_err(|e| {
        io::Error::other(format!(
            "Failed to create FASTA index for '{fasta_path}': {e}"
        ))
    })?;
    std::fs::read_to_string(&fai_path)
}

impl FastaIndex {
    pub fn build_from_files(fasta_files: &[String]) -> io::Result<Self> {
        let mut index = FastaIndex {
            fasta_paths: Vec::with_capacity(fasta_files.len()),
            sequence_to_file: FxHashMap::default(),
            sequence_lengths: FxHashMap::default(),
        };

        for (file_idx, fasta_path) in fasta_files.iter().enumerate() {
            let content = read_or_build_fai(fasta_path)?;
            for (name, length) in parse_fai(&content) {
                index.sequence_to_file.insert(name.to_string(), file_idx);
                index.sequence_lengths.insert(name.to_string(), length);
            }
            index.fasta_paths.push(fasta_path.clone());
        }

        Ok(index)
    }

    fn fasta_path_of(&self, seq_name: &str) -> Option<&str> {
        self.sequence_to_file
            .get(seq_name)
            .map(|&idx| self.fasta_paths[idx].as_str())
    }

    /// Upper-cased bases of `seq_name` over the 1-based, inclusive range `[start, stop]`
    pub fn fetch_sequence(&self, seq_name: &str, start: i64, stop: i64) -> io::Result<Vec<u8>> {
        let fasta_path = self.fasta_path_of(seq_name).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Sequence '{seq_name}' not found in any FASTA file"),
            )
        })?;
        let length = self.get_sequence_length(seq_name)? as i64;
        if start < 1 || stop > length || start > stop {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Range {start}-{stop} is outside '{seq_name}' (length {length})"),
            ));
        }

        let reader = faidx::Reader::from_path(fasta_path).map_err(|e| {
            io::Error::other(format!("Failed to open FASTA file '{fasta_path}': {e}"))
        })?;

        // fetch_seq takes 0-based inclusive coordinates
        match reader.fetch_seq(seq_name, (start - 1) as usize, (stop - 1) as usize) {
            Ok(seq) => {
                let mut seq_vec = seq.to_vec();
                unsafe { libc::free(seq.as_ptr() as *mut std::ffi::c_void) }; // Free up memory to avoid memory leak (bug https://github.com/rust-bio/rust-htslib/issues/401#issuecomment-1704290171)
                seq_vec.make_ascii_uppercase();
                Ok(seq_vec)
            }
            Err(e) => Err(io::Error::other(format!(
                "Failed to fetch sequence for {seq_name}: {e}"
            ))),
        }
    }

    pub fn get_sequence_length(&self, seq_name: &str) -> io::Result<usize> {
        self.sequence_lengths.get(seq_name).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Sequence '{seq_name}' not found"),
            )
        })
    }
}
