//! trackcount CLI

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tc_core::TrackSchema;
use tc_tagging::engine::DEFAULT_PROGRESS_EVERY;
use tc_tagging::event_parquet::DEFAULT_BATCH_SIZE;
use tc_tagging::{
    CutSpec, EventParquetReader, InputLayout, JetTaggingEngine, ParallelTagger, ParquetTagWriter,
    RunSummary, TaggingConfig,
};

#[derive(Parser)]
#[command(name = "trackcount")]
#[command(about = "Track-counting b-jet tagging (IP, TCHE, TCHP)")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tag every jet of the input events and write one record per tagged jet
    Tag {
        /// Input event files (Parquet), read back to back
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Output record file (Parquet)
        #[arg(short, long)]
        output: PathBuf,

        /// Tagging configuration (JSON). Without it every track is selected.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Extra track cut, e.g. "Track_pt > 1.0". Repeatable; applied after
        /// the configured cuts.
        #[arg(long = "cut")]
        cuts: Vec<String>,

        /// Threads (0 = auto). 1 runs the sequential engine.
        #[arg(long, default_value = "1")]
        threads: usize,

        /// Events between progress log lines (0 disables)
        #[arg(long, default_value_t = DEFAULT_PROGRESS_EVERY)]
        progress_every: u64,

        /// Events decoded per batch (and per parallel block)
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Validate a configuration against input files without tagging
    CheckConfig {
        /// Tagging configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Input event files (Parquet)
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Extra track cut, e.g. "Track_pt > 1.0"
        #[arg(long = "cut")]
        cuts: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Tag { input, output, config, cuts, threads, progress_every, batch_size } => {
            cmd_tag(&input, &output, config.as_deref(), &cuts, threads, progress_every, batch_size)
        }
        Commands::CheckConfig { config, input, cuts } => cmd_check_config(&config, &input, &cuts),
    }
}

fn load_config(path: Option<&Path>, cuts: &[String]) -> Result<TaggingConfig> {
    let config = match path {
        Some(p) => {
            tracing::info!(path = %p.display(), "loading tagging config");
            TaggingConfig::from_path(p)
                .with_context(|| format!("loading tagging config {}", p.display()))?
        }
        None => TaggingConfig::default(),
    };
    let extra = cuts
        .iter()
        .map(|c| c.parse::<CutSpec>().with_context(|| format!("parsing --cut {c:?}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(config.with_cuts(extra))
}

fn open_input(
    input: &[PathBuf],
    config: &TaggingConfig,
    batch_size: usize,
) -> Result<EventParquetReader> {
    let reader =
        EventParquetReader::open(input, &config.required_track_fields(), InputLayout::default())
            .context("opening event input")?;
    Ok(reader.with_batch_size(batch_size))
}

#[derive(Serialize)]
struct TagReport {
    output: PathBuf,
    workers: usize,
    #[serde(flatten)]
    summary: RunSummary,
}

fn cmd_tag(
    input: &[PathBuf],
    output: &Path,
    config: Option<&Path>,
    cuts: &[String],
    threads: usize,
    progress_every: u64,
    batch_size: usize,
) -> Result<()> {
    let config = load_config(config, cuts)?;
    let reader = open_input(input, &config, batch_size)?;
    let schema = reader.schema().clone();
    let make_engine = || JetTaggingEngine::from_config(&config, schema.clone());

    // engines are built before the output file is created
    let workers = if threads == 0 { rayon::current_num_threads() } else { threads };
    let summary = if workers <= 1 {
        let mut engine = make_engine()
            .context("building selection pipeline")?
            .with_progress_every(progress_every);
        let mut writer = ParquetTagWriter::create(output)
            .with_context(|| format!("creating {}", output.display()))?;
        let run = engine.run(reader, &mut writer);
        close_after(writer, run)?
    } else {
        let _ = rayon::ThreadPoolBuilder::new().num_threads(workers).build_global();
        let mut tagger = ParallelTagger::new(workers, make_engine)
            .context("building selection pipeline")?
            .with_progress_every(progress_every);
        let mut writer = ParquetTagWriter::create(output)
            .with_context(|| format!("creating {}", output.display()))?;
        let run = tagger.run(reader, &mut writer, batch_size);
        close_after(writer, run)?
    };

    let report = TagReport { output: output.to_path_buf(), workers, summary };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Close the output even when the run aborted, keeping the records emitted
/// before the failure readable.
fn close_after(writer: ParquetTagWriter, run: tc_core::Result<RunSummary>) -> Result<RunSummary> {
    let written = writer.finish();
    let summary = match run {
        Ok(summary) => summary,
        Err(e) => {
            if let Ok(n) = &written {
                tracing::warn!(records = *n, "run aborted; records emitted so far were kept");
            }
            return Err(e).context("tagging aborted");
        }
    };
    written.context("closing output")?;
    Ok(summary)
}

#[derive(Serialize)]
struct CheckReport {
    stages: Vec<String>,
    significance_field: String,
    track_fields: Vec<String>,
    events: u64,
}

fn cmd_check_config(config: &Path, input: &[PathBuf], cuts: &[String]) -> Result<()> {
    let config = load_config(Some(config), cuts)?;
    let reader = open_input(input, &config, DEFAULT_BATCH_SIZE)?;
    let schema: &TrackSchema = reader.schema();
    let engine = JetTaggingEngine::from_config(&config, reader.schema().clone())
        .context("building selection pipeline")?;

    let report = CheckReport {
        stages: engine.pipeline().stage_names().into_iter().map(str::to_string).collect(),
        significance_field: config.significance_field.clone(),
        track_fields: schema.names().to_vec(),
        events: reader.total_events()?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
