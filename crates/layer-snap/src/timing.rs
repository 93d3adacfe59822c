//! Stage timing via the `tracing` ecosystem.
//!
//! Enable with `RUST_LOG=layer_snap::timing=debug` (or `-vv` in the CLI).

use std::time::Instant;
use tracing::{debug, info};

/// A timer that logs a stage's duration when dropped.
pub struct StageTimer {
    name: &'static str,
    start: Instant,
}

impl StageTimer {
    /// Start timing a pipeline stage.
    pub fn new(name: &'static str) -> Self {
        debug!(target: "layer_snap::timing", stage = name, "Starting stage");
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        info!(
            target: "layer_snap::timing",
            stage = self.name,
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "Stage completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timer_elapsed() {
        let timer = StageTimer::new("test_stage");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }
}
