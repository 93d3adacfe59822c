//! layersnap: Command-line polygon layer alignment.
//!
//! Snaps a moving polygon layer onto a fixed reference layer within an
//! automatically derived tolerance, then trims the overshoot. Layers are
//! exchanged as JSON files of polygon rings, suitable for scripting and QA
//! pipelines.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=layer_snap=info` - Stage progress logging
//! - `RUST_LOG=layer_snap=debug` - Detailed progress logging
//! - `RUST_LOG=layer_snap::timing=debug` - Per-stage timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Align parcels onto the basemap, writing outputs next to the inputs
//! layersnap align parcels.json basemap.json --out-dir aligned/
//!
//! # Inspect the tolerance the data would produce, without writing anything
//! layersnap tolerance parcels.json basemap.json --percentile 0.9
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod output;

use commands::{align, tolerance};

/// layersnap - align a polygon layer onto a reference layer.
#[derive(Parser)]
#[command(name = "layersnap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Align a moving layer onto a reference layer
    Align {
        /// Moving polygon layer (JSON)
        moving: PathBuf,

        /// Fixed reference polygon layer (JSON)
        reference: PathBuf,

        /// Directory for the output layers
        #[arg(long, short)]
        out_dir: PathBuf,

        /// Configuration file (TOML); flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Hard cap on the derived snap tolerance
        #[arg(long)]
        max_snap: Option<f64>,

        /// Percentile of the distance sample used for tolerance selection
        #[arg(long)]
        percentile: Option<f64>,

        /// Reproject both layers to this spatial reference WKID
        #[arg(long)]
        target_wkid: Option<u32>,

        /// Post-trim simplification tolerance (0 disables)
        #[arg(long)]
        post_simplify: Option<f64>,

        /// Skip the diagnostic overlap layer
        #[arg(long)]
        no_overlap_diag: bool,

        /// Skip geometry repair during preparation
        #[arg(long)]
        no_repair: bool,
    },

    /// Report the snap tolerance the data would produce, without aligning
    Tolerance {
        /// Moving polygon layer (JSON)
        moving: PathBuf,

        /// Fixed reference polygon layer (JSON)
        reference: PathBuf,

        /// Percentile of the distance sample used for tolerance selection
        #[arg(long, default_value = "0.95")]
        percentile: f64,

        /// Hard cap on the derived snap tolerance
        #[arg(long, default_value = "10.0")]
        max_snap: f64,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    // If quiet, don't initialize any tracing
    if quiet {
        return;
    }

    // Check RUST_LOG first, then fall back to -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "layer_snap=info",
            2 => "layer_snap=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    // Install miette's panic hook for better error display in development
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Align {
            moving,
            reference,
            out_dir,
            config,
            max_snap,
            percentile,
            target_wkid,
            post_simplify,
            no_overlap_diag,
            no_repair,
        } => align::run(
            moving,
            reference,
            out_dir,
            config.as_deref(),
            align::Overrides {
                max_snap: *max_snap,
                percentile: *percentile,
                target_wkid: *target_wkid,
                post_simplify: *post_simplify,
                no_overlap_diag: *no_overlap_diag,
                no_repair: *no_repair,
            },
            &cli,
        ),
        Commands::Tolerance {
            moving,
            reference,
            percentile,
            max_snap,
        } => tolerance::run(moving, reference, *percentile, *max_snap, &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            // Enhanced display for the library's diagnostic errors
            if let Some(align_err) = e.downcast_ref::<layer_snap::AlignError>() {
                eprintln!("{}: {}", "Error".red().bold(), align_err);
                eprintln!("  {}: {}", "Code".cyan(), align_err.code());
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    align_err.recovery_suggestion()
                );
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
