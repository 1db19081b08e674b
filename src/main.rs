use anyhow::{Context, Result};
use clap::Parser;
use mediasort::core::mover::TransferMode;
use mediasort::logging::init_logging;
use mediasort::{ConfigError, DEFAULT_RADIUS, Pipeline, PipelineError, RunConfig, RunSummary};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "mediasort",
    version,
    about = "Group visually similar images and videos into folders"
)]
struct Cli {
    /// Directory to scan (recursively)
    #[arg(value_name = "INPUT", default_value = "input")]
    input: PathBuf,

    /// Directory to sort files into
    #[arg(value_name = "OUTPUT", default_value = "output")]
    output: PathBuf,

    /// Maximum differing fingerprint bits for two files to count as similar
    #[arg(long, default_value_t = DEFAULT_RADIUS)]
    radius: u32,

    /// Worker threads (default: number of CPUs)
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Copy files instead of moving them
    #[arg(long)]
    copy: bool,

    /// Only show what would be moved
    #[arg(long)]
    dry_run: bool,

    /// ffmpeg binary used to pull key frames out of videos
    #[arg(long, value_name = "PATH", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Seconds to wait on a stalled move before giving up on the rest
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    grace_secs: u64,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        let defaults = RunConfig::default();
        RunConfig {
            input: self.input,
            output: self.output,
            radius: self.radius,
            threads: self.threads.unwrap_or(defaults.threads),
            grace_period: Duration::from_secs(self.grace_secs),
            mode: if self.copy {
                TransferMode::Copy
            } else {
                TransferMode::Move
            },
            dry_run: self.dry_run,
            ffmpeg: self.ffmpeg,
            show_progress: !self.no_progress,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.into_config();
    println!(
        "▶ Sorting {} → {}",
        config.input.display(),
        config.output.display()
    );

    let pipeline = Pipeline::new(config).context("Failed to set up worker pool")?;
    match pipeline.run() {
        Ok(summary) => {
            print_summary(&pipeline, &summary);
            Ok(ExitCode::SUCCESS)
        }
        Err(PipelineError::Config(e @ ConfigError::InvalidInput { .. })) => {
            eprintln!("{}", e);
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e).context("Sorting failed"),
    }
}

fn print_summary(pipeline: &Pipeline, summary: &RunSummary) {
    println!(
        "Found {} file(s): {} fingerprinted, {} unclusterable",
        summary.discovered, summary.fingerprinted, summary.unclusterable
    );
    if summary.groups == 0 {
        println!("No similar files found.");
    } else {
        println!(
            "✨ {} similarity group(s) holding {} file(s)",
            summary.groups, summary.grouped_files
        );
    }
    println!("   📦 {} file(s) to originals", summary.originals);

    if summary.dry_run {
        println!("\n⚠️  Dry-run only; no files were changed.");
        return;
    }

    println!(
        "\n✅ {} file(s) relocated into {}",
        summary.moved,
        pipeline.config().output.display()
    );
    if summary.failed > 0 {
        println!("⚠️  {} file(s) could not be moved", summary.failed);
    }
    if summary.cancelled > 0 {
        println!("⚠️  {} move(s) cancelled", summary.cancelled);
    }
}
