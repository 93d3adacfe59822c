//! Polygon layer alignment.
//!
//! `layer-snap` snaps a "moving" polygon layer onto a fixed reference layer
//! within an automatically derived tolerance, then trims the overshoot
//! slivers where snapping pushed the moving layer into the reference. The
//! tolerance is data-driven: a high percentile of the vertex-to-boundary
//! distance distribution, clamped into a safe range.
//!
//! The geometric work itself lives behind the [`GeometryEngine`] trait; this
//! crate orchestrates the stages, derives the tolerance, and routes around
//! fragile shared workspaces (locked outputs, rejected writes) without
//! failing the run. A self-contained [`MemoryEngine`] over planar convex
//! polygons makes the pipeline runnable end to end without an external
//! geometry system.
//!
//! # Example
//!
//! ```
//! use layer_snap::{AlignConfig, AlignPipeline, MemoryEngine, WorkspaceResolver};
//!
//! let mut engine = MemoryEngine::new();
//! engine.insert_polygon_layer(
//!     "in/parcels",
//!     2277,
//!     vec![vec![[7.0, 0.0], [7.0, 10.0], [-5.0, 5.0]]],
//! );
//! engine.insert_polygon_layer(
//!     "in/basemap",
//!     2277,
//!     vec![vec![[10.0, 0.0], [20.0, 0.0], [20.0, 10.0], [10.0, 10.0]]],
//! );
//!
//! let resolver = WorkspaceResolver::standard("memory", "scratch", "out");
//! let mut pipeline = AlignPipeline::new(engine, AlignConfig::default(), resolver);
//! let report = pipeline.run("in/parcels", "in/basemap")?;
//! assert!(report.tolerance >= 0.5);
//! # Ok::<(), layer_snap::AlignError>(())
//! ```

pub mod engine;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod resilience;
pub mod timing;
pub mod tolerance;
pub mod workspace;

pub use engine::{
    EngineError, EngineResult, GeometryEngine, SimplifyAlgorithm, SnapMode, SnapRule, SpatialRef,
};
pub use error::{AlignError, AlignResult, ErrorCode};
pub use memory::{MemoryEngine, PolygonLayerFile};
pub use pipeline::{AlignConfig, AlignPipeline, AlignReport, ConfigError};
pub use resilience::{ensure_writable_output, erase_with_fallback, FallbackOutcome};
pub use timing::StageTimer;
pub use tolerance::{estimate, ToleranceParams};
pub use workspace::{Workspace, WorkspaceKind, WorkspaceResolver};
