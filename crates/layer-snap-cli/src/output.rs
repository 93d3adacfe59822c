//! Shared output helpers for text and JSON result rendering.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print a serializable result as JSON; no-op for text format (commands
/// render their own text output).
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    if let OutputFormat::Json = format {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("failed to serialize result: {e}"),
        }
    }
}

/// Print a success line in text format.
pub fn success(message: &str, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    if let OutputFormat::Text = format {
        println!("{} {}", "✓".green().bold(), message);
    }
}
