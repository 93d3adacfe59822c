//! layersnap align command - snap a layer onto a reference and trim it.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use layer_snap::{
    AlignConfig, AlignPipeline, MemoryEngine, PolygonLayerFile, WorkspaceResolver,
};
use serde::Serialize;

use crate::{output, Cli, OutputFormat};

/// Command-line overrides applied on top of the loaded configuration.
pub struct Overrides {
    pub max_snap: Option<f64>,
    pub percentile: Option<f64>,
    pub target_wkid: Option<u32>,
    pub post_simplify: Option<f64>,
    pub no_overlap_diag: bool,
    pub no_repair: bool,
}

#[derive(Serialize)]
struct AlignResultOutput {
    moving: String,
    reference: String,
    aligned_output: String,
    reference_output: String,
    overlap_diagnostic: Option<String>,
    tolerance: f64,
    densify_interval: Option<f64>,
    simplify_applied: bool,
    stages: Vec<String>,
}

pub fn run(
    moving: &Path,
    reference: &Path,
    out_dir: &Path,
    config_path: Option<&Path>,
    overrides: Overrides,
    cli: &Cli,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => AlignConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => AlignConfig::default(),
    };
    apply_overrides(&mut config, &overrides);
    config.validate().context("Invalid configuration")?;

    let mut engine = MemoryEngine::new();
    load_layer(&mut engine, "in/a", moving)?;
    load_layer(&mut engine, "in/b", reference)?;

    let resolver = WorkspaceResolver::standard("memory", "scratch", "out");
    let mut pipeline = AlignPipeline::new(engine, config, resolver);
    let report = pipeline.run("in/a", "in/b")?;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;
    let engine = pipeline.engine();
    let aligned_output = export_layer(engine, &report.a_output, out_dir)?;
    let reference_output = export_layer(engine, &report.b_output, out_dir)?;
    let overlap_diagnostic = report
        .overlap_diagnostic
        .as_deref()
        .map(|diag| export_layer(engine, diag, out_dir))
        .transpose()?;

    let result = AlignResultOutput {
        moving: moving.display().to_string(),
        reference: reference.display().to_string(),
        aligned_output,
        reference_output,
        overlap_diagnostic,
        tolerance: report.tolerance,
        densify_interval: report.densify_interval,
        simplify_applied: report.simplify_applied,
        stages: report.stage_log.clone(),
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Aligned layer saved to {}", result.aligned_output),
                    cli.format,
                    cli.quiet,
                );
                println!("  {}: {:.2}", "Tolerance".cyan(), result.tolerance);
                if let Some(interval) = result.densify_interval {
                    println!("  {}: {:.2}", "Densify interval".cyan(), interval);
                }
                println!("  {}: {}", "Reference".cyan(), result.reference_output);
                if let Some(diag) = &result.overlap_diagnostic {
                    println!("  {}: {}", "Overlap diagnostic".cyan(), diag);
                }
                for stage in &result.stages {
                    println!("    {stage}");
                }
            }
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut AlignConfig, overrides: &Overrides) {
    if let Some(max_snap) = overrides.max_snap {
        config.max_snap = max_snap;
    }
    if let Some(percentile) = overrides.percentile {
        config.near_percentile = percentile;
    }
    if let Some(wkid) = overrides.target_wkid {
        config.target_wkid = Some(wkid);
    }
    if let Some(post_simplify) = overrides.post_simplify {
        config.post_simplify = (post_simplify > 0.0).then_some(post_simplify);
    }
    if overrides.no_overlap_diag {
        config.make_overlap_diag = false;
    }
    if overrides.no_repair {
        config.repair_geometry = false;
    }
}

/// Read a JSON polygon layer file into the engine under `dataset`.
pub(crate) fn load_layer(engine: &mut MemoryEngine, dataset: &str, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read layer file {:?}", path))?;
    let layer: PolygonLayerFile = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse layer file {:?}", path))?;
    engine.insert_layer_file(dataset, &layer);
    Ok(())
}

/// Export a produced dataset as `<name>.json` in the output directory.
fn export_layer(engine: &MemoryEngine, dataset: &str, out_dir: &Path) -> Result<String> {
    let layer = engine
        .export_layer_file(dataset)
        .with_context(|| format!("Produced dataset {dataset} is missing from the engine"))?;
    let name = dataset.rsplit('/').next().unwrap_or(dataset);
    let file = out_dir.join(format!("{name}.json"));
    let json = serde_json::to_string_pretty(&layer)?;
    fs::write(&file, json).with_context(|| format!("Failed to write {:?}", file))?;
    Ok(file.display().to_string())
}
