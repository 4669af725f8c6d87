use crate::alignment_record::Strand;
use crate::classify::MappingClass;
use crate::consistency::LogSink;
use crate::coverage::{CoverageAggregator, CoverageResult};
use crate::pipeline::TrackSet;
use crate::request::ReadClassFilter;
use crate::scheduler::{ChannelListener, IntervalRequestScheduler, SchedulerConfig, ThreadEvent};
use log::{debug, info};
use std::io::{self, Write};
use std::sync::Arc;

/// Configuration for the coverage command
pub struct CoverageConfig {
    pub padding: i64,
    pub with_diffs_and_gaps: bool,
    pub read_class_filter: ReadClassFilter,
}

/// Serve `chromosome:[from, to]` through a scheduler and write the result as TSV.
pub fn run_coverage(
    track_set: TrackSet,
    chromosome: &str,
    from: i64,
    to: i64,
    config: &CoverageConfig,
    out: &mut dyn Write,
) -> io::Result<()> {
    let chromosome_id = track_set.chromosomes().get_id(chromosome).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("Chromosome '{chromosome}' not found in the reference"),
        )
    })?;

    let scheduler_config = SchedulerConfig {
        padding: config.padding,
        ..SchedulerConfig::default()
    };
    let mut scheduler =
        IntervalRequestScheduler::spawn(track_set, scheduler_config, Arc::new(LogSink))
            .map_err(io::Error::other)?;
    let (listener, events) = ChannelListener::new();
    let requester = scheduler
        .requester(Arc::new(listener))
        .map_err(io::Error::other)?;

    let read_class_filter = config.read_class_filter;
    let with_diffs_and_gaps = config.with_diffs_and_gaps;
    requester
        .request(chromosome_id, from, to, |request| {
            request
                .with_diffs_and_gaps(with_diffs_and_gaps)
                .with_read_class_filter(read_class_filter)
        })
        .map_err(io::Error::other)?;

    let result = loop {
        match events.recv().map_err(io::Error::other)? {
            ThreadEvent::DownloadStatus { finished, .. } => {
                if finished {
                    info!("Finished reading alignments");
                } else {
                    info!("Reading alignments for {chromosome}:{from}-{to}");
                }
            }
            ThreadEvent::UnzipStatus { finished, .. } => {
                debug!("Decompression {}", if finished { "done" } else { "started" });
            }
            ThreadEvent::Coverage { result, .. } => break result,
            ThreadEvent::Skipped { .. } => {
                return Err(io::Error::other("Request was superseded"));
            }
            ThreadEvent::Failed { message, .. } => return Err(io::Error::other(message)),
        }
    };
    scheduler.shutdown();

    match result.as_ref() {
        CoverageResult::Combined(coverage) => {
            write_class_counts(out, chromosome, from, to, coverage)?;
            if with_diffs_and_gaps {
                write_diffs_and_gaps(out, chromosome, from, to, &[("all", coverage)])?;
            }
        }
        CoverageResult::Double(coverage) => {
            writeln!(out, "#chrom\tpos\tstrand\tfirst\tsecond\tdifference")?;
            for position in from..=to {
                for strand in Strand::BOTH {
                    writeln!(
                        out,
                        "{}\t{}\t{}\t{}\t{}\t{}",
                        chromosome,
                        position,
                        strand.symbol(),
                        coverage.first.counters().total(position, strand),
                        coverage.second.counters().total(position, strand),
                        coverage.difference(position, strand)
                    )?;
                }
            }
            if with_diffs_and_gaps {
                write_diffs_and_gaps(
                    out,
                    chromosome,
                    from,
                    to,
                    &[("first", &coverage.first), ("second", &coverage.second)],
                )?;
            }
        }
    }
    out.flush()
}

fn write_class_counts(
    out: &mut dyn Write,
    chromosome: &str,
    from: i64,
    to: i64,
    coverage: &CoverageAggregator,
) -> io::Result<()> {
    write!(out, "#chrom\tpos\tstrand\ttotal")?;
    for class in MappingClass::ALL {
        write!(out, "\t{}", class.name())?;
    }
    writeln!(out)?;

    let counters = coverage.counters();
    for position in from..=to {
        for strand in Strand::BOTH {
            write!(
                out,
                "{}\t{}\t{}\t{}",
                chromosome,
                position,
                strand.symbol(),
                counters.total(position, strand)
            )?;
            for class in MappingClass::ALL {
                write!(out, "\t{}", counters.count(position, class, strand))?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

fn write_diffs_and_gaps(
    out: &mut dyn Write,
    chromosome: &str,
    from: i64,
    to: i64,
    tracks: &[(&str, &CoverageAggregator)],
) -> io::Result<()> {
    writeln!(out, "#kind\ttrack\tchrom\tpos\torder\tbase\tstrand")?;
    for &(label, coverage) in tracks {
        for diff in coverage
            .diffs()
            .iter()
            .filter(|d| d.position >= from && d.position <= to)
        {
            writeln!(
                out,
                "diff\t{}\t{}\t{}\t.\t{}\t{}",
                label,
                chromosome,
                diff.position,
                diff.base as char,
                Strand::from_reverse_flag(!diff.is_forward_strand).symbol()
            )?;
        }
        for gap in coverage
            .gaps()
            .iter()
            .filter(|g| g.position >= from && g.position <= to)
        {
            writeln!(
                out,
                "gap\t{}\t{}\t{}\t{}\t{}\t{}",
                label,
                chromosome,
                gap.position,
                gap.order,
                gap.base as char,
                Strand::from_reverse_flag(!gap.is_forward_strand).symbol()
            )?;
        }
    }
    Ok(())
}
