use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use flowtrail_cli::output::json::write_json;
use flowtrail_cli::types::RunConfig;
use flowtrail_cli::{InputSpec, TrackOptions, TrailProcessor};
use tracing_subscriber::EnvFilter;

/// Sparse feature tracking with persistent per-point trails
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track points across frames and draw their trails
    Track(TrackArgs),
    /// Detect corners on each frame without tracking
    Detect(CommonArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Image directory, video file, or `synthetic[:seed]`
    #[arg(short, long, default_value = "synthetic")]
    input: String,

    /// YAML run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for rendered frames
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop after this many frames (overrides the config file)
    #[arg(long)]
    max_frames: Option<usize>,

    /// Write a JSON summary to this path
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TrackArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Save every n-th composited frame
    #[arg(long, default_value_t = 1)]
    save_every: u64,

    /// Read q / n / r commands from stdin while running
    #[arg(long)]
    interactive: bool,
}

fn load_config(common: &CommonArgs) -> anyhow::Result<RunConfig> {
    let mut config = match &common.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => RunConfig::default(),
    };
    if common.max_frames.is_some() {
        config.max_frames = common.max_frames;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Track(args) => {
            let config = load_config(&args.common)?;
            let processor = TrailProcessor::new(config);
            let options = TrackOptions {
                input: InputSpec::parse(&args.common.input),
                output_dir: args.common.output.clone(),
                save_every: args.save_every,
                interactive: args.interactive,
            };
            let output = processor.track(&options)?;
            if let Some(path) = &args.common.summary {
                write_json(&output, path)?;
            }
        }
        Command::Detect(common) => {
            let config = load_config(&common)?;
            let processor = TrailProcessor::new(config);
            let input = InputSpec::parse(&common.input);
            let output = processor.detect(&input, common.output.as_deref())?;
            if let Some(path) = &common.summary {
                write_json(&output, path)?;
            }
        }
    }

    Ok(())
}
