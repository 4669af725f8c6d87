use clap::{Parser, ValueEnum};
use log::info;
use mapcov::alignment_source::{open_track, AlignmentSource};
use mapcov::classify::MappingClass;
use mapcov::commands::classify::run_classify;
use mapcov::commands::coverage::{run_coverage, CoverageConfig};
use mapcov::pipeline::{TrackMode, TrackSet};
use mapcov::request::ReadClassFilter;
use mapcov::sequence_index::{open_reference, ReferenceSource};
use rayon::ThreadPoolBuilder;
use std::io::{self, BufWriter};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Common options shared between all commands
#[derive(Parser, Debug)]
struct CommonOpts {
    /// Alignment files: indexed BAM/CRAM, SAM or BGZF-compressed SAM.
    #[clap(short = 'a', long, value_parser, num_args = 1.., required = true)]
    alignment_files: Vec<String>,

    /// Reference FASTA files (plain or bgzipped). A missing .fai index is created.
    /// CRAM files are decoded against the first one.
    #[clap(short = 'f', long, value_parser, num_args = 1.., required = true)]
    sequence_files: Vec<String>,

    /// Region in the format `chrom:start-end`, 1-based and inclusive
    #[clap(short = 'r', long, value_parser)]
    region: String,

    /// Only keep these mapping classes (comma-separated): single_perfect, perfect, single_best, best, common
    #[clap(short = 'c', long, value_delimiter = ',')]
    classes: Vec<String>,

    /// Ignore mappings with a lower mapping quality
    #[clap(short = 'q', long, value_parser, default_value_t = 0)]
    min_mapq: u8,

    /// Number of threads for parallel processing.
    #[clap(short = 't', long, value_parser, default_value_t = NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN))]
    num_threads: NonZeroUsize,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    /// Sum all tracks
    Combined,
    /// Two tracks side by side with their difference
    Double,
}

/// Read coverage by mapping class over reference regions.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
enum Args {
    /// Per-position, per-strand coverage broken down by mapping class
    Coverage {
        #[clap(flatten)]
        common: CommonOpts,

        /// How multiple alignment files are shown
        #[clap(short = 'm', long, value_enum, default_value_t = ModeArg::Combined)]
        mode: ModeArg,

        /// Bases fetched beyond each side of the region
        #[clap(short = 'p', long, value_parser, default_value_t = 1000)]
        padding: i64,

        /// Also print the diffs and gaps of the region
        #[clap(short = 'd', long, action)]
        diffs_and_gaps: bool,
    },
    /// Classify every mapping overlapping the region
    Classify {
        #[clap(flatten)]
        common: CommonOpts,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    match args {
        Args::Coverage {
            common,
            mode,
            padding,
            diffs_and_gaps,
        } => {
            let mode = match mode {
                ModeArg::Combined => TrackMode::Combined,
                ModeArg::Double => TrackMode::Double,
            };
            let track_set = initialize(&common, mode)?;
            let (chromosome, (from, to)) = parse_region(&common.region)?;
            let config = CoverageConfig {
                padding,
                with_diffs_and_gaps: diffs_and_gaps,
                read_class_filter: parse_read_class_filter(&common.classes, common.min_mapq)?,
            };
            let mut out = BufWriter::new(io::stdout().lock());
            run_coverage(track_set, &chromosome, from, to, &config, &mut out)?;
        }
        Args::Classify { common } => {
            let track_set = initialize(&common, TrackMode::Combined)?;
            let (chromosome, (from, to)) = parse_region(&common.region)?;
            let filter = parse_read_class_filter(&common.classes, common.min_mapq)?;
            let mut out = BufWriter::new(io::stdout().lock());
            run_classify(&track_set, &chromosome, from, to, filter, &mut out)?;
        }
    }

    Ok(())
}

fn initialize(common: &CommonOpts, mode: TrackMode) -> io::Result<TrackSet> {
    // Initialize logger based on verbosity
    env_logger::Builder::new()
        .filter_level(match common.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    // Configure thread pool
    ThreadPoolBuilder::new()
        .num_threads(common.num_threads.into())
        .build_global()
        .map_err(io::Error::other)?;

    let reference: Arc<dyn ReferenceSource> = Arc::new(open_reference(&common.sequence_files)?);
    let cram_reference = common.sequence_files.first().map(String::as_str);
    let tracks = common
        .alignment_files
        .iter()
        .map(|path| open_track(path, cram_reference))
        .collect::<Result<Vec<Arc<dyn AlignmentSource>>, _>>()
        .map_err(io::Error::other)?;
    info!(
        "Loaded {} alignment file(s) against {} reference file(s)",
        tracks.len(),
        common.sequence_files.len()
    );

    TrackSet::new(tracks, reference, mode).map_err(io::Error::other)
}

fn parse_read_class_filter(classes: &[String], min_mapq: u8) -> io::Result<ReadClassFilter> {
    let filter = if classes.is_empty() {
        ReadClassFilter::all()
    } else {
        let classes = classes
            .iter()
            .map(|name| {
                MappingClass::from_name(name.trim()).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("Unknown mapping class '{}'", name),
                    )
                })
            })
            .collect::<io::Result<Vec<_>>>()?;
        ReadClassFilter::only(&classes)
    };
    Ok(filter.with_min_mapping_quality(min_mapq))
}

fn parse_region(region: &str) -> io::Result<(String, (i64, i64))> {
    let parts: Vec<&str> = region.rsplitn(2, ':').collect();
    if parts.len() != 2 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Region format should be `chrom:start-end`",
        ));
    }

    let (start, end) = parse_range(&parts[0].split('-').collect::<Vec<_>>())?;
    Ok((parts[1].to_string(), (start, end)))
}

fn parse_range(range_parts: &[&str]) -> io::Result<(i64, i64)> {
    if range_parts.len() != 2 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Range format should be `start-end`",
        ));
    }

    let start = range_parts[0]
        .replace(',', "")
        .parse::<i64>()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Invalid start value"))?;
    let end = range_parts[1]
        .replace(',', "")
        .parse::<i64>()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Invalid end value"))?;

    if start < 1 || start > end {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Start must be at least 1 and not larger than end",
        ));
    }

    Ok((start, end))
}
