//! The end-to-end alignment pipeline.
//!
//! Strictly linear stage order, terminal on the first unrecovered failure:
//! prepare, measure, tolerance, stage outputs, densify, snap, overlap
//! diagnostic, trim overshoot, simplify, report. Every stage is timed and
//! appends a human-readable progress message to the run report.
//!
//! The orchestrator does no geometry itself. It wires a [`GeometryEngine`],
//! a [`WorkspaceResolver`] and an immutable [`AlignConfig`] together, and
//! rebinds the canonical "A output" name to each stage's fresh result with a
//! copy-then-swap so a failed rebind never loses the produced layer.

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::{GeometryEngine, SimplifyAlgorithm, SnapRule, SpatialRef};
use crate::error::{AlignError, AlignResult};
use crate::resilience::{ensure_writable_output, erase_with_fallback};
use crate::timing::StageTimer;
use crate::tolerance::{self, ToleranceParams};
use crate::workspace::{base_name, WorkspaceResolver};

/// Default hard cap on the derived snap tolerance.
pub const DEFAULT_MAX_SNAP: f64 = 10.0;

/// Default percentile for tolerance selection.
pub const DEFAULT_NEAR_PERCENTILE: f64 = 0.95;

/// Default post-trim simplification tolerance.
pub const DEFAULT_POST_SIMPLIFY: f64 = 0.2;

/// Upper bound on the derived densify interval.
const DENSIFY_INTERVAL_CEILING: f64 = 2.0;

/// Errors arising from loading or validating an [`AlignConfig`].
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    #[diagnostic(code(align::config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    #[diagnostic(code(align::config::parse))]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {details}")]
    #[diagnostic(code(align::config::invalid))]
    Invalid { details: String },
}

/// Immutable run configuration.
///
/// Constructed once and handed to [`AlignPipeline::new`]; nothing in the
/// pipeline mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Target spatial reference WKID; `None` keeps the source reference.
    pub target_wkid: Option<u32>,
    /// Repair invalid geometry (and drop null features) during prepare.
    pub repair_geometry: bool,
    /// Hard cap on the derived snap tolerance.
    pub max_snap: f64,
    /// Percentile of the distance sample used for tolerance selection.
    pub near_percentile: f64,
    /// Densify interval; `None` derives it from the tolerance.
    pub densify_interval: Option<f64>,
    /// Post-trim simplification tolerance; `None` or non-positive skips it.
    pub post_simplify: Option<f64>,
    /// Produce the diagnostic overlap layer.
    pub make_overlap_diag: bool,
    /// Base name of the aligned output layer.
    pub a_output_name: String,
    /// Base name of the staged reference output layer.
    pub b_output_name: String,
    /// Base name of the diagnostic overlap layer.
    pub overlap_diag_name: String,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            target_wkid: None,
            repair_geometry: true,
            max_snap: DEFAULT_MAX_SNAP,
            near_percentile: DEFAULT_NEAR_PERCENTILE,
            densify_interval: None,
            post_simplify: Some(DEFAULT_POST_SIMPLIFY),
            make_overlap_diag: true,
            a_output_name: "a_aligned".into(),
            b_output_name: "b_reference".into(),
            overlap_diag_name: "overlap_diag".into(),
        }
    }
}

impl AlignConfig {
    /// Load a configuration from a TOML file. Missing fields take defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Check value ranges and required names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.near_percentile) {
            return Err(ConfigError::Invalid {
                details: format!(
                    "near_percentile must be in [0, 1], got {}",
                    self.near_percentile
                ),
            });
        }
        if self.max_snap <= 0.0 {
            return Err(ConfigError::Invalid {
                details: format!("max_snap must be positive, got {}", self.max_snap),
            });
        }
        for (field, value) in [
            ("a_output_name", &self.a_output_name),
            ("b_output_name", &self.b_output_name),
            ("overlap_diag_name", &self.overlap_diag_name),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid {
                    details: format!("{field} must not be empty"),
                });
            }
        }
        Ok(())
    }

    /// The densify interval for a derived tolerance: the configured value,
    /// or the lesser of a fixed ceiling and one third of the tolerance.
    pub fn densify_interval_for(&self, tolerance: f64) -> f64 {
        self.densify_interval
            .unwrap_or_else(|| DENSIFY_INTERVAL_CEILING.min(tolerance / 3.0))
    }
}

/// The canonical result paths and run diagnostics of a completed alignment.
#[derive(Debug, Clone, Serialize)]
pub struct AlignReport {
    /// Path of the aligned (snapped, trimmed, possibly simplified) layer.
    pub a_output: String,
    /// Path of the staged reference layer.
    pub b_output: String,
    /// Path of the diagnostic overlap layer, when produced.
    pub overlap_diagnostic: Option<String>,
    /// The derived snap tolerance.
    pub tolerance: f64,
    /// The densify interval applied, when densification ran.
    pub densify_interval: Option<f64>,
    /// Whether post-trim simplification was applied.
    pub simplify_applied: bool,
    /// Human-readable progress messages, in stage order.
    pub stage_log: Vec<String>,
}

/// Orchestrates the alignment stages against a geometry engine.
pub struct AlignPipeline<E: GeometryEngine> {
    engine: E,
    config: AlignConfig,
    resolver: WorkspaceResolver,
}

impl<E: GeometryEngine> AlignPipeline<E> {
    pub fn new(engine: E, config: AlignConfig, resolver: WorkspaceResolver) -> Self {
        Self {
            engine,
            config,
            resolver,
        }
    }

    /// The engine, for inspecting produced layers after a run.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Consume the pipeline and return the engine.
    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Align the moving layer `a` onto the fixed reference layer `b`.
    ///
    /// Best-effort cleanup of cached workspace handles runs on every exit
    /// path, success or failure.
    pub fn run(&mut self, a: &str, b: &str) -> AlignResult<AlignReport> {
        let result = self.run_stages(a, b);
        let durable = self.resolver.durable_id().to_string();
        if let Err(e) = self.engine.clear_workspace_cache(&durable) {
            debug!(
                target: "layer_snap::pipeline",
                workspace = durable.as_str(),
                reason = %e,
                "Workspace cache cleanup failed"
            );
        }
        result
    }

    /// Run only prepare and measure and return the derived tolerance,
    /// without staging or mutating any output.
    pub fn probe_tolerance(&mut self, a: &str, b: &str) -> AlignResult<f64> {
        let (a_prep, b_prep) = self.prepare(a, b)?;
        let sample = self.measure(&a_prep, &b_prep)?;
        let params = ToleranceParams::new(self.config.near_percentile, self.config.max_snap);
        tolerance::estimate(&sample, &params)
    }

    fn run_stages(&mut self, a: &str, b: &str) -> AlignResult<AlignReport> {
        let mut log = Vec::new();

        let (a_prep, b_prep) = self.prepare(a, b)?;
        stage_msg(&mut log, format!("Prepared inputs: {a_prep}, {b_prep}"));

        let sample = self.measure(&a_prep, &b_prep)?;
        stage_msg(
            &mut log,
            format!("Measured {} vertex-to-boundary distances", sample.len()),
        );

        let tolerance = {
            let _timer = StageTimer::new("compute_tolerance");
            let params = ToleranceParams::new(self.config.near_percentile, self.config.max_snap);
            tolerance::estimate(&sample, &params)?
        };
        stage_msg(
            &mut log,
            format!(
                "Auto snap tolerance (p{:.0}): {:.2} (cap {:.1})",
                self.config.near_percentile * 100.0,
                tolerance,
                self.config.max_snap
            ),
        );

        let (a_out, b_out) = self.stage_outputs(&a_prep, &b_prep)?;
        stage_msg(&mut log, format!("Staged outputs: {a_out}, {b_out}"));

        let interval = self.config.densify_interval_for(tolerance);
        let densify_applied = interval > 0.0;
        if densify_applied {
            let _timer = StageTimer::new("densify");
            self.engine
                .densify(&a_out, interval)
                .map_err(|e| AlignError::engine("densify", e))?;
            stage_msg(&mut log, format!("Densified at interval {interval:.2}"));
        }

        {
            let _timer = StageTimer::new("snap");
            let rules = [
                SnapRule::edge(b_out.as_str(), tolerance),
                SnapRule::vertex(b_out.as_str(), tolerance),
            ];
            self.engine
                .snap(&a_out, &rules)
                .map_err(|e| AlignError::engine("snap", e))?;
        }
        stage_msg(
            &mut log,
            format!("Snapped to reference edges and vertices within {tolerance:.2}"),
        );

        let overlap_diagnostic = if self.config.make_overlap_diag {
            let _timer = StageTimer::new("diagnose_overlap");
            let durable = self.resolver.durable_id().to_string();
            let diag = ensure_writable_output(
                &mut self.engine,
                &mut self.resolver,
                &durable,
                &self.config.overlap_diag_name.clone(),
            );
            self.engine
                .intersect(&[&a_out, &b_out], &diag)
                .map_err(|e| AlignError::engine("diagnose_overlap", e))?;
            stage_msg(&mut log, format!("Overlap diagnostic: {diag}"));
            Some(diag)
        } else {
            None
        };

        {
            let _timer = StageTimer::new("trim_overshoot");
            let scratch = self.resolver.scratch_id().to_string();
            let trimmed = self.resolver.unique_name(&self.engine, "a_trim", &scratch);
            let outcome = erase_with_fallback(
                &mut self.engine,
                &mut self.resolver,
                &a_out,
                &b_out,
                &trimmed,
            )?;
            self.replace_output(&a_out, &trimmed)?;
            stage_msg(
                &mut log,
                format!("Trimmed overshoot via {}", outcome.strategy),
            );
        }

        let simplify_applied = self.simplify(&a_out, &mut log)?;

        Ok(AlignReport {
            a_output: a_out,
            b_output: b_out,
            overlap_diagnostic,
            tolerance,
            densify_interval: densify_applied.then_some(interval),
            simplify_applied,
            stage_log: log,
        })
    }

    /// Materialize both inputs into a common spatial reference and
    /// optionally repair their geometry.
    fn prepare(&mut self, a: &str, b: &str) -> AlignResult<(String, String)> {
        let _timer = StageTimer::new("prepare");
        let target = self.config.target_wkid.map(SpatialRef);
        let a_prep = self
            .resolver
            .materialize_to_first_working(&mut self.engine, a, target)?;
        let b_prep = self
            .resolver
            .materialize_to_first_working(&mut self.engine, b, target)?;
        if self.config.repair_geometry {
            self.engine
                .repair_geometry(&a_prep, true)
                .map_err(|e| AlignError::engine("prepare", e))?;
            self.engine
                .repair_geometry(&b_prep, true)
                .map_err(|e| AlignError::engine("prepare", e))?;
        }
        Ok((a_prep, b_prep))
    }

    /// Derive B's boundary and A's vertices, measure nearest distances, and
    /// return the usable (measured) sample.
    fn measure(&mut self, a_prep: &str, b_prep: &str) -> AlignResult<Vec<f64>> {
        let _timer = StageTimer::new("measure");
        let scratch = self.resolver.scratch_id().to_string();

        let b_lines = self.resolver.unique_name(&self.engine, "b_lines", &scratch);
        self.engine
            .polygon_to_boundary_lines(b_prep, &b_lines)
            .map_err(|e| AlignError::engine("measure", e))?;

        let a_points = self.resolver.unique_name(&self.engine, "a_verts", &scratch);
        self.engine
            .vertices_to_points(a_prep, &a_points)
            .map_err(|e| AlignError::engine("measure", e))?;

        let distances = self
            .engine
            .nearest_distances(&a_points, &b_lines)
            .map_err(|e| AlignError::engine("measure", e))?;

        let unmeasured = distances.iter().filter(|d| d.is_none()).count();
        if unmeasured > 0 {
            warn!(
                target: "layer_snap::pipeline",
                unmeasured = unmeasured,
                "Some vertices had no measurable distance to the reference boundary"
            );
        }
        Ok(distances.into_iter().flatten().collect())
    }

    /// Copy the prepared layers to the stable, final-named outputs.
    fn stage_outputs(&mut self, a_prep: &str, b_prep: &str) -> AlignResult<(String, String)> {
        let _timer = StageTimer::new("stage_outputs");
        let durable = self.resolver.durable_id().to_string();

        let a_name = self.config.a_output_name.clone();
        let a_out = ensure_writable_output(&mut self.engine, &mut self.resolver, &durable, &a_name);
        self.engine
            .copy(a_prep, &a_out)
            .map_err(|e| AlignError::engine("stage_outputs", e))?;

        let b_name = self.config.b_output_name.clone();
        let b_out = ensure_writable_output(&mut self.engine, &mut self.resolver, &durable, &b_name);
        self.engine
            .copy(b_prep, &b_out)
            .map_err(|e| AlignError::engine("stage_outputs", e))?;

        Ok((a_out, b_out))
    }

    /// Rebind the canonical output name to a freshly produced layer.
    ///
    /// Copy-then-swap: the fresh layer is first copied to a staging name in
    /// the durable workspace and verified; only then is the old output
    /// deleted and the staging copy moved into its place. On any failure the
    /// produced result survives at the path named in the error.
    fn replace_output(&mut self, canonical: &str, fresh: &str) -> AlignResult<()> {
        let durable = self.resolver.durable_id().to_string();
        let staging_base = format!("{}_swap", base_name(canonical));
        let staging = self
            .resolver
            .unique_name(&self.engine, &staging_base, &durable);

        if let Err(e) = self.engine.copy(fresh, &staging) {
            return Err(AlignError::replace_failed(
                canonical,
                fresh,
                format!("staging copy failed: {e}"),
            ));
        }
        if !self.engine.exists(&staging) {
            return Err(AlignError::replace_failed(
                canonical,
                fresh,
                "staging dataset missing after copy",
            ));
        }
        if let Err(e) = self.engine.delete(canonical) {
            return Err(AlignError::replace_failed(
                canonical,
                &staging,
                format!("could not delete the prior output: {e}"),
            ));
        }
        if let Err(e) = self.engine.copy(&staging, canonical) {
            return Err(AlignError::replace_failed(
                canonical,
                &staging,
                format!("final copy failed: {e}"),
            ));
        }
        // The staging copy is redundant once the canonical name is rebound.
        let _ = self.engine.delete(&staging);
        Ok(())
    }

    /// Post-trim simplification. The operation itself is cosmetic and
    /// non-fatal: on failure the trimmed output stands and the run succeeds.
    /// A failed rebind of a successful simplification is still fatal, since
    /// it leaves the canonical name pointing at nothing.
    fn simplify(&mut self, a_out: &str, log: &mut Vec<String>) -> AlignResult<bool> {
        let tolerance = match self.config.post_simplify.filter(|t| *t > 0.0) {
            Some(t) => t,
            None => return Ok(false),
        };
        let _timer = StageTimer::new("simplify");
        let scratch = self.resolver.scratch_id().to_string();
        let simplified = self.resolver.unique_name(&self.engine, "a_simp", &scratch);

        match self.engine.simplify_polygon(
            a_out,
            &simplified,
            SimplifyAlgorithm::PointRemove,
            tolerance,
        ) {
            Ok(()) => {
                self.replace_output(a_out, &simplified)?;
                stage_msg(log, format!("Simplified output (tolerance {tolerance:.2})"));
                Ok(true)
            }
            Err(e) => {
                warn!(
                    target: "layer_snap::pipeline",
                    reason = %e,
                    "Simplify failed; the trimmed output stands"
                );
                stage_msg(log, format!("Simplify skipped: {e}"));
                Ok(false)
            }
        }
    }
}

fn stage_msg(log: &mut Vec<String>, message: String) {
    info!(target: "layer_snap::pipeline", "{message}");
    log.push(message);
}
