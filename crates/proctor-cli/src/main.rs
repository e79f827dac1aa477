use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proctor_core::{FrameSize, GraphOptions};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

mod labels;
mod replay;
mod transform;

#[derive(Parser, Debug)]
#[command(name = "proctor", author, version, about, long_about = None)]
struct Cli {
    /// TOML config file (same layout as proctord's PROCTOR_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Source frame size, e.g. 1280x720
    #[arg(long, global = true)]
    input_size: Option<FrameSize>,

    /// Aligned crop size, e.g. 112x112
    #[arg(long, global = true)]
    output_size: Option<FrameSize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a recorded JSON-lines packet log through the graph
    Replay {
        /// Packet log ("-" for stdin)
        file: PathBuf,
    },
    /// Compute the crop transform for one landmark set
    Transform {
        /// JSON array of {x, y, z} landmarks, normalized to the input frame
        file: PathBuf,
        /// Print the eye-line alignment matrix instead
        #[arg(long)]
        interocular: bool,
    },
    /// Print overlay labels for result records
    Labels {
        /// JSON-lines output of proctord or `proctor replay` ("-" for stdin)
        file: PathBuf,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    graph: GraphOptions,
}

/// Graph options from `--config`, then the size flags.
fn graph_options(cli: &Cli) -> Result<GraphOptions> {
    let mut options = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file: ConfigFile = toml::from_str(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            file.graph
        }
        None => GraphOptions::default(),
    };
    if let Some(size) = cli.input_size {
        options.input_size = size;
    }
    if let Some(size) = cli.output_size {
        options.output_size = size;
    }
    Ok(options)
}

fn open_input(path: &Path) -> Result<Box<dyn std::io::BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(std::io::stdin().lock()));
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(std::io::BufReader::new(file)))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = graph_options(&cli)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Command::Replay { file } => {
            let summary = replay::run(options, open_input(file)?, &mut out)?;
            tracing::info!(
                packets = summary.packets,
                rejected = summary.rejected,
                emitted = summary.emitted,
                discarded = summary.discarded,
                "replay finished"
            );
        }
        Command::Transform { file, interocular } => {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let landmarks = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a landmark array", file.display()))?;
            if *interocular {
                transform::print_interocular(&landmarks, options.input_size, &mut out)?;
            } else {
                transform::print_similarity(&landmarks, &options, &mut out)?;
            }
        }
        Command::Labels { file } => {
            let printed = labels::run(open_input(file)?, &mut out)?;
            tracing::debug!(results = printed, "labels printed");
        }
    }

    Ok(())
}
