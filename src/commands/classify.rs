use crate::consistency::LogSink;
use crate::pipeline::{classify_track, ClassifiedMapping, TrackSet};
use crate::request::ReadClassFilter;
use log::info;
use rayon::prelude::*;
use std::io::{self, Write};

/// Classify every mapping of `chromosome:[from, to]` in every track and write
/// one TSV row per mapping, read names in natural order.
pub fn run_classify(
    track_set: &TrackSet,
    chromosome: &str,
    from: i64,
    to: i64,
    read_class_filter: ReadClassFilter,
    out: &mut dyn Write,
) -> io::Result<()> {
    if track_set.chromosomes().get_id(chromosome).is_none() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Chromosome '{chromosome}' not found in the reference"),
        ));
    }

    let per_track: Vec<(&str, Vec<ClassifiedMapping>)> = track_set
        .tracks()
        .par_iter()
        .map(|track| {
            classify_track(
                track.as_ref(),
                track_set.reference(),
                chromosome,
                from,
                to,
                false,
                &LogSink,
            )
            .map(|mappings| (track.name(), mappings))
            .map_err(io::Error::other)
        })
        .collect::<io::Result<Vec<_>>>()?;

    let mut rows: Vec<(&str, &ClassifiedMapping)> = per_track
        .iter()
        .flat_map(|(name, mappings)| mappings.iter().map(move |m| (*name, m)))
        .filter(|(_, m)| {
            read_class_filter.accepts(m.classification.class, m.mapping.record.mapping_quality)
        })
        .collect();
    rows.sort_by(|a, b| {
        natord::compare(&a.1.mapping.record.read_name, &b.1.mapping.record.read_name)
            .then(a.1.mapping.record.alignment_start.cmp(&b.1.mapping.record.alignment_start))
            .then(a.0.cmp(b.0))
    });
    info!("Classified {} mappings", rows.len());

    writeln!(
        out,
        "#track\tread\tchrom\tstart\tend\tstrand\tmapq\tcigar\tdifferences\tclass\toccurrences\tnext_start"
    )?;
    for (track, classified) in rows {
        let record = &classified.mapping.record;
        let classification = &classified.classification;
        let next_start = classification
            .next_mapping_start
            .map_or_else(|| ".".to_string(), |start| start.to_string());
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            track,
            record.read_name,
            record.reference_name,
            record.alignment_start,
            record.alignment_end,
            record.strand.symbol(),
            record.mapping_quality,
            record.cigar,
            classified.mapping.extraction.difference_count,
            classification.class.name(),
            classification.occurrences,
            next_start
        )?;
    }
    out.flush()
}
