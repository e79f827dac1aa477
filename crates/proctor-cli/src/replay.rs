//! `proctor replay`: offline run of a recorded packet log.

use std::io::{BufRead, Write};

use anyhow::Result;
use proctor_core::wire::{self, OutputRecord};
use proctor_core::{GraphOptions, ProctorGraph};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub packets: u64,
    pub rejected: u64,
    pub emitted: u64,
    pub discarded: u64,
}

/// Feed every line of `input` through a fresh graph, writing output records
/// to `out` as JSON lines. Unparseable lines are skipped and counted.
pub fn run(options: GraphOptions, input: impl BufRead, out: &mut impl Write) -> Result<ReplaySummary> {
    let mut graph = ProctorGraph::new(options)?;
    let mut summary = ReplaySummary::default();

    for (n, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let packet = match wire::parse_line(&line) {
            Ok(packet) => packet,
            Err(e) => {
                summary.rejected += 1;
                tracing::warn!(line = n + 1, error = %e, "skipping malformed packet");
                continue;
            }
        };
        summary.packets += 1;

        let frame = wire::dispatch(&mut graph, packet);
        for record in OutputRecord::from_frame(&frame) {
            writeln!(out, "{}", wire::to_line(&record)?)?;
        }
    }

    graph.close_all();
    summary.emitted = graph.emitted();
    summary.discarded = graph.discarded();
    Ok(summary)
}
