//! The geometry engine collaborator.
//!
//! The alignment core does no geometry itself: it orchestrates calls against
//! a [`GeometryEngine`], computes a tolerance, and manages intermediate
//! dataset lifecycles. Everything geometric lives behind this trait:
//! reprojection, boundary extraction, nearest-distance measurement,
//! densification, snapping, intersection, erase, and simplification.
//!
//! Datasets are addressed by path strings of the form `workspace/name`. A
//! layer is immutable once read except through explicit engine operations,
//! and the engine never assumes exclusive access to any dataset: `delete`
//! may fail at any time because another process holds a lock.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A spatial reference, identified by its well-known id (WKID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpatialRef(pub u32);

impl std::fmt::Display for SpatialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WKID:{}", self.0)
    }
}

/// Snap environment: what part of the reference geometry attracts vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapMode {
    /// Snap to the nearest point anywhere on a reference edge.
    Edge,
    /// Snap to the nearest reference vertex.
    Vertex,
}

/// One snap rule: a reference layer, a mode, and a tolerance.
///
/// Rules are applied in order; a vertex already moved by an earlier rule can
/// be moved again by a later one.
#[derive(Debug, Clone)]
pub struct SnapRule {
    pub reference: String,
    pub mode: SnapMode,
    pub tolerance: f64,
}

impl SnapRule {
    /// Edge-snap rule against `reference` within `tolerance`.
    pub fn edge(reference: impl Into<String>, tolerance: f64) -> Self {
        Self {
            reference: reference.into(),
            mode: SnapMode::Edge,
            tolerance,
        }
    }

    /// Vertex-snap rule against `reference` within `tolerance`.
    pub fn vertex(reference: impl Into<String>, tolerance: f64) -> Self {
        Self {
            reference: reference.into(),
            mode: SnapMode::Vertex,
            tolerance,
        }
    }
}

/// Polygon simplification algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimplifyAlgorithm {
    /// Remove vertices whose deviation from the simplified outline is below
    /// the tolerance (Douglas-Peucker style point removal).
    PointRemove,
    /// Remove vertices closer than the tolerance to the last kept vertex.
    RadialDistance,
}

/// Failure reported by the geometry engine for a single operation.
#[derive(Debug, Clone, Error)]
#[error("engine operation `{operation}` failed: {details}")]
pub struct EngineError {
    pub operation: &'static str,
    pub details: String,
}

impl EngineError {
    pub fn new(operation: &'static str, details: impl Into<String>) -> Self {
        Self {
            operation,
            details: details.into(),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// The operations the alignment pipeline requires from a geometry engine.
///
/// All dataset arguments are `workspace/name` paths. Operations that take an
/// output path create a new dataset there; in-place operations
/// (`repair_geometry`, `densify`, `snap`) mutate an existing one.
pub trait GeometryEngine {
    /// Whether a dataset exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Delete the dataset at `path`. Fails if it is locked or missing.
    fn delete(&mut self, path: &str) -> EngineResult<()>;

    /// Copy the dataset at `src` to `dst`.
    fn copy(&mut self, src: &str, dst: &str) -> EngineResult<()>;

    /// Copy `src` to `dst`, reprojecting into `target`.
    fn reproject(&mut self, src: &str, dst: &str, target: SpatialRef) -> EngineResult<()>;

    /// Spatial reference of the dataset at `path`.
    fn spatial_ref(&self, path: &str) -> EngineResult<SpatialRef>;

    /// Repair invalid geometry in place, optionally dropping null features.
    fn repair_geometry(&mut self, layer: &str, drop_nulls: bool) -> EngineResult<()>;

    /// Derive a polygon layer's boundary as line geometry.
    fn polygon_to_boundary_lines(&mut self, src: &str, dst: &str) -> EngineResult<()>;

    /// Derive a point layer containing every vertex of `src`.
    fn vertices_to_points(&mut self, src: &str, dst: &str) -> EngineResult<()>;

    /// Annotate each point in `points` with its nearest distance to `target`
    /// and return the per-point distances. A distance is `None` when no
    /// measurement was possible for that point.
    fn nearest_distances(&mut self, points: &str, target: &str) -> EngineResult<Vec<Option<f64>>>;

    /// Insert additional vertices along every edge at roughly `interval`
    /// spacing, in place.
    fn densify(&mut self, layer: &str, interval: f64) -> EngineResult<()>;

    /// Move `layer`'s vertices toward the references described by `rules`,
    /// in place.
    fn snap(&mut self, layer: &str, rules: &[SnapRule]) -> EngineResult<()>;

    /// Full geometric intersection of the input polygon layers.
    fn intersect(&mut self, inputs: &[&str], dst: &str) -> EngineResult<()>;

    /// Set difference: `subject` minus `eraser`.
    fn erase(&mut self, subject: &str, eraser: &str, dst: &str) -> EngineResult<()>;

    /// Alternate implementation of [`GeometryEngine::erase`] with identical
    /// semantics but a different algorithmic path.
    fn pairwise_erase(&mut self, subject: &str, eraser: &str, dst: &str) -> EngineResult<()>;

    /// Full overlay of `subject` and `eraser`, tagging each output feature
    /// with a `FID_*` field recording which eraser feature (if any)
    /// contributed it; `-1` marks features contributed by `subject` alone.
    fn overlay_identity(&mut self, subject: &str, eraser: &str, dst: &str) -> EngineResult<()>;

    /// Names of the attribute fields present on `layer`.
    fn list_fields(&self, layer: &str) -> EngineResult<Vec<String>>;

    /// Copy the features of `src` whose `field` equals `value` to `dst`.
    fn select_copy(&mut self, src: &str, field: &str, value: i64, dst: &str) -> EngineResult<()>;

    /// Simplify `src`'s polygons into `dst` with the given algorithm.
    fn simplify_polygon(
        &mut self,
        src: &str,
        dst: &str,
        algorithm: SimplifyAlgorithm,
        tolerance: f64,
    ) -> EngineResult<()>;

    /// Release any cached handles the engine holds on `workspace`.
    /// Best-effort: callers ignore failures.
    fn clear_workspace_cache(&mut self, workspace: &str) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_rule_constructors() {
        let edge = SnapRule::edge("out/b", 3.0);
        assert_eq!(edge.mode, SnapMode::Edge);
        assert_eq!(edge.reference, "out/b");

        let vertex = SnapRule::vertex("out/b", 3.0);
        assert_eq!(vertex.mode, SnapMode::Vertex);
    }

    #[test]
    fn test_spatial_ref_display() {
        assert_eq!(SpatialRef(2277).to_string(), "WKID:2277");
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::new("erase", "subject layer missing");
        let display = format!("{}", err);
        assert!(display.contains("erase"));
        assert!(display.contains("subject layer missing"));
    }
}
