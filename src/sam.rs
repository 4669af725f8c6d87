//! SAM text parsing
//!
//! Reads plain or BGZF-compressed SAM files into [`MappingRecord`]s. Header
//! lines and unmapped records are skipped; records that cannot be parsed are
//! reported to the caller's sink and skipped without aborting the scan.

use crate::alignment_record::{MappingRecord, Strand};
use crate::cigar::{alignment_stop, parse_cigar};
use crate::consistency::MessageSink;
use crate::error::{MappingError, Result};
use log::debug;
use noodles::bgzf;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

const FLAG_PAIRED: u16 = 0x1;
const FLAG_UNMAPPED: u16 = 0x4;
const FLAG_REVERSE: u16 = 0x10;
const FLAG_FIRST_IN_PAIR: u16 = 0x40;
const FLAG_SECOND_IN_PAIR: u16 = 0x80;

const BGZF_HEADER_SIZE: usize = 18;

/// Check whether a file starts with a valid BGZF header.
/// Returns `Ok(false)` for regular gzip, too-small files, or plain text.
fn is_bgzf<R: Read + Seek>(reader: &mut R) -> std::io::Result<bool> {
    let mut header = [0u8; BGZF_HEADER_SIZE];
    let result = match reader.read_exact(&mut header) {
        Ok(()) => {
            Ok(header[0..2] == [0x1f, 0x8b]      // gzip magic
                && header[2] == 0x08              // DEFLATE
                && header[3] == 0x04              // FEXTRA
                && header[10..12] == [0x06, 0x00] // XLEN=6
                && header[12..14] == [b'B', b'C'] // BC subfield
                && header[14..16] == [0x02, 0x00]) // SLEN=2
        }
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    };
    reader.seek(SeekFrom::Start(0))?;
    result
}

/// Open a SAM file for line-wise reading, decompressing `.gz`/`.bgz` files.
pub fn open_sam_reader(sam_file: &str) -> std::io::Result<Box<dyn BufRead>> {
    let mut file = File::open(sam_file)?;
    if [".gz", ".bgz"].iter().any(|e| sam_file.ends_with(e)) {
        if !is_bgzf(&mut file)? {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "'{}' is regular gzip, not BGZF. Convert with: zcat '{}' | bgzip > output.sam.gz",
                    sam_file, sam_file
                ),
            ));
        }
        debug!("Reading {} through a BGZF reader", sam_file);
        Ok(Box::new(BufReader::new(bgzf::io::Reader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Parse a single SAM alignment line. Returns `Ok(None)` for unmapped records.
pub fn parse_sam_line(line: &str) -> Result<Option<MappingRecord>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 11 {
        return Err(MappingError::MalformedInput(format!(
            "SAM record has {} fields, expected at least 11",
            fields.len()
        )));
    }

    let flag = fields[1].parse::<u16>().map_err(|e| {
        MappingError::MalformedInput(format!("Invalid FLAG '{}': {}", fields[1], e))
    })?;
    if flag & FLAG_UNMAPPED != 0 || fields[2] == "*" {
        return Ok(None);
    }

    let alignment_start = fields[3].parse::<i64>().map_err(|e| {
        MappingError::MalformedInput(format!("Invalid POS '{}': {}", fields[3], e))
    })?;
    let mapping_quality = fields[4].parse::<u8>().map_err(|e| {
        MappingError::MalformedInput(format!("Invalid MAPQ '{}': {}", fields[4], e))
    })?;

    // A broken CIGAR is kept on the record so the consistency check can report it
    let cigar = fields[5].to_string();
    let alignment_end = match parse_cigar(&cigar) {
        Ok(ops) => alignment_stop(alignment_start, &ops),
        Err(_) => alignment_start,
    };

    let pair_tag = if flag & FLAG_PAIRED == 0 {
        None
    } else if flag & FLAG_FIRST_IN_PAIR != 0 {
        Some(b'1')
    } else if flag & FLAG_SECOND_IN_PAIR != 0 {
        Some(b'2')
    } else {
        None
    };

    let read_sequence = if fields[9] == "*" {
        Vec::new()
    } else {
        fields[9].as_bytes().to_ascii_uppercase()
    };

    Ok(Some(MappingRecord {
        read_name: fields[0].to_string(),
        pair_tag,
        reference_name: fields[2].to_string(),
        alignment_start,
        alignment_end,
        strand: Strand::from_reverse_flag(flag & FLAG_REVERSE != 0),
        mapping_quality,
        cigar,
        read_sequence,
    }))
}

/// Collect the mapped records on `chromosome` overlapping `[from, to]`.
/// Unparseable lines go to `sink`.
pub fn parse_sam<R: BufRead>(
    reader: R,
    chromosome: &str,
    from: i64,
    to: i64,
    sink: &dyn MessageSink,
) -> Result<Vec<MappingRecord>> {
    let mut records = Vec::new();
    for (line_number, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.is_empty() || line.starts_with('@') {
            continue;
        }

        match parse_sam_line(&line) {
            Ok(Some(record)) => {
                if record.reference_name == chromosome
                    && record.alignment_start <= to
                    && record.alignment_end >= from
                {
                    records.push(record);
                }
            }
            Ok(None) => {}
            Err(e) => sink.send_message(&format!("Skipping SAM line {}: {}", line_number + 1, e)),
        }
    }
    Ok(records)
}
