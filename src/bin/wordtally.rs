use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use wordtally::config::{AggregationStrategy, OverlongPolicy, PipelineConfig};
use wordtally::{Pipeline, RunSummary, TallyError};

const DEFAULT_FREQUENCIES: &str = "frequencies.txt";
const DEFAULT_MEDIANS: &str = "medians.txt";

const EXIT_FAILURE: u8 = 1;
const EXIT_INPUT: u8 = 2;
const EXIT_OUTPUT: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about = "Word frequency and running median toolkit", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Count word frequencies and write the running median of unique words per line
    Run(RunArgs),
    /// Print the chunk and shard layout without scanning records
    Plan(PlanArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Number of scanner threads (defaults to available parallelism, max 32)
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Approximate bytes processed per chunk before medians are flushed
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<u64>,

    /// Shards smaller than this use fewer threads
    #[arg(long, value_name = "BYTES")]
    min_shard_bytes: Option<u64>,

    /// Maximum line length in bytes, excluding the newline
    #[arg(long, value_name = "BYTES")]
    max_record_len: Option<usize>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Input file of newline-terminated records
    input: PathBuf,

    /// Output path for the word frequency table
    #[arg(long, value_name = "PATH", default_value = DEFAULT_FREQUENCIES)]
    frequencies: PathBuf,

    /// Output path for the running median series
    #[arg(long, value_name = "PATH", default_value = DEFAULT_MEDIANS)]
    medians: PathBuf,

    #[command(flatten)]
    scan: ScanArgs,

    /// Frequency aggregation strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::ShardLocal)]
    strategy: StrategyArg,

    /// Cut overlong lines instead of failing
    #[arg(long)]
    truncate_long_records: bool,

    /// Write a JSON run report
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Disable the progress spinner
    #[arg(long)]
    no_progress: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Input file of newline-terminated records
    input: PathBuf,

    #[command(flatten)]
    scan: ScanArgs,

    /// Emit JSON instead of human-readable output
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    ShardLocal,
    SharedLock,
}

impl From<StrategyArg> for AggregationStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::ShardLocal => AggregationStrategy::ShardLocal,
            StrategyArg::SharedLock => AggregationStrategy::SharedLock,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let outcome = match cli.command {
        Commands::Run(args) => run_tally(args),
        Commands::Plan(args) => run_plan(args),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

fn exit_status(err: &anyhow::Error) -> u8 {
    match err
        .chain()
        .find_map(|cause| cause.downcast_ref::<TallyError>())
    {
        Some(TallyError::OpenInput { .. }) => EXIT_INPUT,
        Some(TallyError::CreateOutput { .. }) => EXIT_OUTPUT,
        _ => EXIT_FAILURE,
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    use log::LevelFilter;

    let level = if quiet > 0 {
        match quiet {
            1 => LevelFilter::Warn,
            _ => LevelFilter::Error,
        }
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    builder.filter_level(level);
    let _ = builder.try_init();
}

fn build_config(
    scan: &ScanArgs,
    strategy: AggregationStrategy,
    overlong: OverlongPolicy,
) -> Result<PipelineConfig> {
    let mut cfg = PipelineConfig::builder()
        .strategy(strategy)
        .overlong(overlong);
    if let Some(threads) = scan.threads {
        cfg = cfg.workers(threads);
    }
    if let Some(chunk_size) = scan.chunk_size {
        cfg = cfg.chunk_size(chunk_size);
    }
    if let Some(min_shard_bytes) = scan.min_shard_bytes {
        cfg = cfg.min_shard_bytes(min_shard_bytes);
    }
    if let Some(max_record_len) = scan.max_record_len {
        cfg = cfg.max_record_len(max_record_len);
    }
    Ok(cfg.build()?)
}

fn run_tally(args: RunArgs) -> Result<()> {
    let overlong = if args.truncate_long_records {
        OverlongPolicy::Truncate
    } else {
        OverlongPolicy::Reject
    };
    let cfg = build_config(&args.scan, args.strategy.into(), overlong)?;
    let pipeline = Pipeline::new(cfg);

    let spinner = if args.no_progress {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner} counting words... {elapsed}")
            .context("invalid progress template")?
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        Some(pb)
    };

    let outcome = pipeline
        .run_to_files(&args.input, &args.frequencies, &args.medians)
        .with_context(|| format!("failed to process {}", args.input.display()));
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let summary = outcome?;

    if let Some(report) = &args.report {
        summary
            .write_json(report)
            .with_context(|| format!("failed to write report to {}", report.display()))?;
        info!("wrote run report to {}", report.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, &args);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, args: &RunArgs) {
    let throughput = if summary.elapsed_ms > 0 {
        bytes_to_mebibytes(summary.input_bytes) / (summary.elapsed_ms as f64 / 1000.0)
    } else {
        0.0
    };
    println!(
        "wrote {} distinct words to {} and {} medians to {}",
        summary.distinct_tokens,
        args.frequencies.display(),
        summary.records,
        args.medians.display()
    );
    println!(
        "   input {:.2} MiB | chunks {} | shards {} | threads {} | {} ms | {:.2} MiB/s",
        bytes_to_mebibytes(summary.input_bytes),
        summary.chunks,
        summary.shards,
        summary.workers,
        summary.elapsed_ms,
        throughput
    );
    if let Some(median) = summary.final_median {
        println!("   final median {median}");
    }
}

fn run_plan(args: PlanArgs) -> Result<()> {
    let cfg = build_config(
        &args.scan,
        AggregationStrategy::default(),
        OverlongPolicy::default(),
    )?;
    let plan = Pipeline::new(cfg)
        .plan(&args.input)
        .with_context(|| format!("failed to plan {}", args.input.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    println!("Input bytes : {}", plan.input_bytes);
    println!("Chunks      : {}", plan.chunks.len());
    for (idx, chunk) in plan.chunks.iter().enumerate() {
        println!(
            "chunk {idx}: {}..{} ({} shard(s))",
            chunk.range.start,
            chunk.range.end,
            chunk.shards.len()
        );
        for shard in &chunk.shards {
            println!("  shard {}..{}", shard.start, shard.end);
        }
    }
    Ok(())
}

fn bytes_to_mebibytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
