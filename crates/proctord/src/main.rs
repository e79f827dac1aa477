use anyhow::{Context, Result};
use proctor_core::wire;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries results; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("proctord starting");

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        config = ?config.config_path,
        input = %config.graph.input_size,
        output = %config.graph.output_size,
        horizon = config.graph.sync_horizon,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(config.graph, config.channel_capacity)?;

    tracing::info!("proctord ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut rejected = 0u64;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            signal = &mut shutdown => {
                signal?;
                tracing::info!("interrupted");
                break;
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let packet = match wire::parse_line(&line) {
            Ok(packet) => packet,
            Err(e) => {
                rejected += 1;
                tracing::warn!(error = %e, "rejecting malformed packet");
                continue;
            }
        };

        for record in engine.process(packet).await? {
            let mut out = wire::to_line(&record)?;
            out.push('\n');
            stdout.write_all(out.as_bytes()).await?;
        }
        stdout.flush().await?;
    }

    let summary = engine.finish().await?;
    tracing::info!(
        emitted = summary.emitted,
        discarded = summary.discarded,
        rejected,
        "proctord shutting down"
    );

    Ok(())
}
