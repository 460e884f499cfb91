use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use trackset_rs::{BuilderConfig, MotBuilder, ReidBuilder, YoloBuilder};

#[derive(Parser, Debug)]
#[command(name = "trackset", about = "Build ReID, MOT and YOLO datasets from box annotations")]
struct Cli {
    /// JSON file overriding configuration defaults
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-identity crops partitioned into train / query / gallery
    Reid(Dirs),
    /// MOTChallenge sequences with gt.txt and seqinfo.ini
    Mot(Dirs),
    /// Frames and normalized labels split into train / valid / test
    Yolo(Dirs),
}

#[derive(Args, Debug)]
struct Dirs {
    /// Annotation tree (must exist)
    input: PathBuf,
    /// Output directory (created if absent)
    output: PathBuf,
    /// Split seed, overriding the configuration
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_target(false)
        .init();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => BuilderConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => BuilderConfig::default(),
    };

    match cli.command {
        Command::Reid(dirs) => {
            ensure_dir_exists(&dirs.input)?;
            if let Some(seed) = dirs.seed {
                config.split.seed = seed;
            }
            let mut builder = ReidBuilder::new(config).context("Invalid configuration")?;
            let summary = builder
                .run(&dirs.input, &dirs.output)
                .context("ReID dataset build failed")?;
            println!(
                "{} crops of {} identities written to {}",
                summary.crops,
                summary.identities,
                dirs.output.display()
            );
        }
        Command::Mot(dirs) => {
            ensure_dir_exists(&dirs.input)?;
            let builder = MotBuilder::new(config).context("Invalid configuration")?;
            let summary = builder
                .run(&dirs.input, &dirs.output)
                .context("MOT ground truth build failed")?;
            println!(
                "{} sequence(s), {} frames, {} detections written to {}",
                summary.sequences.len(),
                summary.frames(),
                summary.detections(),
                dirs.output.display()
            );
        }
        Command::Yolo(dirs) => {
            ensure_dir_exists(&dirs.input)?;
            if let Some(seed) = dirs.seed {
                config.yolo.seed = seed;
            }
            let builder = YoloBuilder::new(config).context("Invalid configuration")?;
            let summary = builder
                .run(&dirs.input, &dirs.output)
                .context("YOLO dataset build failed")?;
            println!(
                "{} train, {} valid, {} test frames written to {}",
                summary.train,
                summary.valid,
                summary.test,
                dirs.output.display()
            );
        }
    }
    Ok(())
}

fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.is_dir() {
        bail!("Input directory not found: {}", path.display());
    }
    Ok(())
}
