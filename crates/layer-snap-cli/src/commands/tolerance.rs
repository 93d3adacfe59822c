//! layersnap tolerance command - report the derived snap tolerance.
//!
//! Read-only QA: runs only the preparation and measurement stages, so no
//! output layers are staged or mutated.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use layer_snap::{AlignConfig, AlignPipeline, MemoryEngine, WorkspaceResolver};
use serde::Serialize;

use crate::commands::align::load_layer;
use crate::{output, Cli, OutputFormat};

#[derive(Serialize)]
struct ToleranceResult {
    moving: String,
    reference: String,
    percentile: f64,
    max_snap: f64,
    tolerance: f64,
}

pub fn run(
    moving: &Path,
    reference: &Path,
    percentile: f64,
    max_snap: f64,
    cli: &Cli,
) -> Result<()> {
    let config = AlignConfig {
        near_percentile: percentile,
        max_snap,
        ..Default::default()
    };
    config.validate()?;

    let mut engine = MemoryEngine::new();
    load_layer(&mut engine, "in/a", moving)?;
    load_layer(&mut engine, "in/b", reference)?;

    let resolver = WorkspaceResolver::standard("memory", "scratch", "out");
    let mut pipeline = AlignPipeline::new(engine, config, resolver);
    let tolerance = pipeline.probe_tolerance("in/a", "in/b")?;

    let result = ToleranceResult {
        moving: moving.display().to_string(),
        reference: reference.display().to_string(),
        percentile,
        max_snap,
        tolerance,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!(
                    "{}: {:.2} (p{:.0}, cap {:.1})",
                    "Snap tolerance".cyan(),
                    result.tolerance,
                    percentile * 100.0,
                    max_snap
                );
            }
        }
    }

    Ok(())
}
