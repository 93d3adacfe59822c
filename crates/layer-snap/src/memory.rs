//! In-memory reference engine over planar polygon layers.
//!
//! [`MemoryEngine`] implements [`GeometryEngine`] for simple layers of
//! convex polygon rings, so the pipeline can run and be tested end to end
//! without an external geometry system. Clipping-based operations
//! (intersect, erase, identity overlay) assume convex rings; concave input
//! produces approximate results and real deployments should plug in a full
//! geometry engine instead.
//!
//! The engine also models the failure modes the pipeline is built to
//! survive: datasets can be locked (`lock`) so deletion fails, whole
//! workspaces can reject writes (`reject_workspace`), and individual
//! operations can be made to fail a set number of times (`fail_next`).

use hashbrown::{HashMap, HashSet};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::engine::{
    EngineError, EngineResult, GeometryEngine, SimplifyAlgorithm, SnapMode, SnapRule, SpatialRef,
};
use crate::workspace::base_name;

type P2 = Point2<f64>;

/// Rings below this area are treated as empty.
const AREA_EPS: f64 = 1e-9;

/// Side-of-line comparisons below this magnitude count as "on the line".
const SIDE_EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
struct PolyFeature {
    ring: Vec<P2>,
    fields: HashMap<String, i64>,
}

impl PolyFeature {
    fn new(ring: Vec<P2>) -> Self {
        Self {
            ring,
            fields: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct MeasuredPoint {
    position: P2,
    near_dist: Option<f64>,
}

#[derive(Debug, Clone)]
enum Dataset {
    Polygons {
        features: Vec<PolyFeature>,
        sr: SpatialRef,
    },
    Lines {
        paths: Vec<Vec<P2>>,
        sr: SpatialRef,
    },
    Points {
        points: Vec<MeasuredPoint>,
        sr: SpatialRef,
    },
}

impl Dataset {
    fn spatial_ref(&self) -> SpatialRef {
        match self {
            Dataset::Polygons { sr, .. } | Dataset::Lines { sr, .. } | Dataset::Points { sr, .. } => {
                *sr
            }
        }
    }

    fn with_spatial_ref(mut self, sr: SpatialRef) -> Self {
        match &mut self {
            Dataset::Polygons { sr: s, .. }
            | Dataset::Lines { sr: s, .. }
            | Dataset::Points { sr: s, .. } => *s = sr,
        }
        self
    }
}

/// Serializable polygon layer, as read and written by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolygonLayerFile {
    /// Well-known id of the layer's spatial reference.
    pub wkid: u32,
    /// One ring per polygon, vertices as `[x, y]`, no closing duplicate.
    pub polygons: Vec<Vec<[f64; 2]>>,
}

/// An in-memory [`GeometryEngine`] over `workspace/name` addressed datasets.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    datasets: HashMap<String, Dataset>,
    locked: HashSet<String>,
    rejected_workspaces: HashSet<String>,
    fail_counts: HashMap<String, usize>,
    op_counts: HashMap<String, usize>,
    suppress_tagging: bool,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a polygon layer from plain coordinate rings.
    pub fn insert_polygon_layer(&mut self, path: &str, wkid: u32, rings: Vec<Vec<[f64; 2]>>) {
        let features = rings
            .into_iter()
            .map(|ring| PolyFeature::new(normalize_ccw(to_points(&ring))))
            .collect();
        self.datasets.insert(
            path.to_string(),
            Dataset::Polygons {
                features,
                sr: SpatialRef(wkid),
            },
        );
    }

    /// Insert a polygon layer from its serialized form.
    pub fn insert_layer_file(&mut self, path: &str, layer: &PolygonLayerFile) {
        self.insert_polygon_layer(path, layer.wkid, layer.polygons.clone());
    }

    /// Export a polygon layer to its serialized form.
    pub fn export_layer_file(&self, path: &str) -> Option<PolygonLayerFile> {
        match self.datasets.get(path)? {
            Dataset::Polygons { features, sr } => Some(PolygonLayerFile {
                wkid: sr.0,
                polygons: features
                    .iter()
                    .map(|f| f.ring.iter().map(|p| [p.x, p.y]).collect())
                    .collect(),
            }),
            _ => None,
        }
    }

    /// The rings of a polygon layer, as plain coordinates.
    pub fn polygon_rings(&self, path: &str) -> Option<Vec<Vec<[f64; 2]>>> {
        self.export_layer_file(path).map(|l| l.polygons)
    }

    /// Number of features in a layer.
    pub fn feature_count(&self, path: &str) -> Option<usize> {
        match self.datasets.get(path)? {
            Dataset::Polygons { features, .. } => Some(features.len()),
            Dataset::Lines { paths, .. } => Some(paths.len()),
            Dataset::Points { points, .. } => Some(points.len()),
        }
    }

    /// Total polygon area of a layer.
    pub fn layer_area(&self, path: &str) -> Option<f64> {
        match self.datasets.get(path)? {
            Dataset::Polygons { features, .. } => {
                Some(features.iter().map(|f| ring_area(&f.ring)).sum())
            }
            _ => None,
        }
    }

    /// Simulate another process holding the dataset open: deletion and
    /// overwriting will fail until [`MemoryEngine::unlock`].
    pub fn lock(&mut self, path: &str) {
        self.locked.insert(path.to_string());
    }

    /// Release a simulated lock.
    pub fn unlock(&mut self, path: &str) {
        self.locked.remove(path);
    }

    /// Make every write into `workspace` fail.
    pub fn reject_workspace(&mut self, workspace: &str) {
        self.rejected_workspaces.insert(workspace.to_string());
    }

    /// Make the next `count` invocations of `operation` fail.
    pub fn fail_next(&mut self, operation: &str, count: usize) {
        *self.fail_counts.entry(operation.to_string()).or_insert(0) += count;
    }

    /// Stop writing `FID_*` contributor fields from `overlay_identity`,
    /// simulating a changed overlay contract.
    pub fn suppress_overlay_tagging(&mut self) {
        self.suppress_tagging = true;
    }

    /// How many times `operation` has been invoked.
    pub fn op_count(&self, operation: &str) -> usize {
        self.op_counts.get(operation).copied().unwrap_or(0)
    }

    fn bump(&mut self, operation: &'static str) {
        *self.op_counts.entry(operation.to_string()).or_insert(0) += 1;
    }

    fn take_failure(&mut self, operation: &'static str) -> bool {
        match self.fail_counts.get_mut(operation) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }

    fn check_writable(&self, path: &str, operation: &'static str) -> EngineResult<()> {
        let workspace = path.split('/').next().unwrap_or("");
        if self.rejected_workspaces.contains(workspace) {
            return Err(EngineError::new(
                operation,
                format!("workspace `{workspace}` rejected the write"),
            ));
        }
        if self.locked.contains(path) {
            return Err(EngineError::new(
                operation,
                format!("`{path}` is locked by another process"),
            ));
        }
        Ok(())
    }

    fn get(&self, path: &str, operation: &'static str) -> EngineResult<&Dataset> {
        self.datasets
            .get(path)
            .ok_or_else(|| EngineError::new(operation, format!("dataset `{path}` does not exist")))
    }

    fn polygons(&self, path: &str, operation: &'static str) -> EngineResult<&Vec<PolyFeature>> {
        match self.get(path, operation)? {
            Dataset::Polygons { features, .. } => Ok(features),
            _ => Err(EngineError::new(
                operation,
                format!("dataset `{path}` is not a polygon layer"),
            )),
        }
    }

    /// Segments of a layer's geometry, for distance and snap queries.
    fn segments_of(&self, path: &str, operation: &'static str) -> EngineResult<Vec<(P2, P2)>> {
        let mut segments = Vec::new();
        match self.get(path, operation)? {
            Dataset::Polygons { features, .. } => {
                for feature in features {
                    for (a, b) in ring_edges(&feature.ring) {
                        segments.push((a, b));
                    }
                }
            }
            Dataset::Lines { paths, .. } => {
                for path in paths {
                    for pair in path.windows(2) {
                        segments.push((pair[0], pair[1]));
                    }
                }
            }
            Dataset::Points { .. } => {
                return Err(EngineError::new(
                    operation,
                    format!("dataset `{path}` has no edges"),
                ));
            }
        }
        Ok(segments)
    }

    fn vertices_of(&self, path: &str, operation: &'static str) -> EngineResult<Vec<P2>> {
        let mut vertices = Vec::new();
        match self.get(path, operation)? {
            Dataset::Polygons { features, .. } => {
                for feature in features {
                    vertices.extend(feature.ring.iter().copied());
                }
            }
            Dataset::Lines { paths, .. } => {
                for path in paths {
                    vertices.extend(path.iter().copied());
                }
            }
            Dataset::Points { points, .. } => {
                vertices.extend(points.iter().map(|p| p.position));
            }
        }
        Ok(vertices)
    }

    fn put(&mut self, path: &str, dataset: Dataset, operation: &'static str) -> EngineResult<()> {
        self.check_writable(path, operation)?;
        self.datasets.insert(path.to_string(), dataset);
        Ok(())
    }

    /// Shared erase routine; `erase` and `pairwise_erase` differ only in
    /// which failure-injection slot they consume.
    fn erase_impl(&mut self, subject: &str, eraser: &str, dst: &str, operation: &'static str) -> EngineResult<()> {
        if self.take_failure(operation) {
            return Err(EngineError::new(operation, "injected failure"));
        }
        let subject_features = self.polygons(subject, operation)?.clone();
        let eraser_rings: Vec<Vec<P2>> = self
            .polygons(eraser, operation)?
            .iter()
            .map(|f| f.ring.clone())
            .collect();
        let sr = self.get(subject, operation)?.spatial_ref();

        let mut out = Vec::new();
        for feature in &subject_features {
            let mut pieces = vec![feature.ring.clone()];
            for eraser_ring in &eraser_rings {
                pieces = pieces
                    .iter()
                    .flat_map(|piece| erase_convex(piece, eraser_ring))
                    .collect();
            }
            out.extend(
                pieces
                    .into_iter()
                    .filter(|ring| ring_area(ring) > AREA_EPS)
                    .map(PolyFeature::new),
            );
        }
        self.put(dst, Dataset::Polygons { features: out, sr }, operation)
    }
}

impl GeometryEngine for MemoryEngine {
    fn exists(&self, path: &str) -> bool {
        self.datasets.contains_key(path)
    }

    fn delete(&mut self, path: &str) -> EngineResult<()> {
        self.bump("delete");
        if self.locked.contains(path) {
            return Err(EngineError::new(
                "delete",
                format!("`{path}` is locked by another process"),
            ));
        }
        if self.datasets.remove(path).is_none() {
            return Err(EngineError::new(
                "delete",
                format!("dataset `{path}` does not exist"),
            ));
        }
        Ok(())
    }

    fn copy(&mut self, src: &str, dst: &str) -> EngineResult<()> {
        self.bump("copy");
        if self.take_failure("copy") {
            return Err(EngineError::new("copy", "injected failure"));
        }
        let dataset = self.get(src, "copy")?.clone();
        self.put(dst, dataset, "copy")
    }

    fn reproject(&mut self, src: &str, dst: &str, target: SpatialRef) -> EngineResult<()> {
        self.bump("reproject");
        // Coordinate transformation itself is a geometry-kernel concern;
        // the in-memory engine carries coordinates through unchanged.
        let dataset = self.get(src, "reproject")?.clone().with_spatial_ref(target);
        self.put(dst, dataset, "reproject")
    }

    fn spatial_ref(&self, path: &str) -> EngineResult<SpatialRef> {
        Ok(self.get(path, "spatial_ref")?.spatial_ref())
    }

    fn repair_geometry(&mut self, layer: &str, drop_nulls: bool) -> EngineResult<()> {
        self.bump("repair_geometry");
        match self.datasets.get_mut(layer) {
            Some(Dataset::Polygons { features, .. }) => {
                if drop_nulls {
                    features.retain(|f| f.ring.len() >= 3);
                }
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(EngineError::new(
                "repair_geometry",
                format!("dataset `{layer}` does not exist"),
            )),
        }
    }

    fn polygon_to_boundary_lines(&mut self, src: &str, dst: &str) -> EngineResult<()> {
        self.bump("polygon_to_boundary_lines");
        let features = self.polygons(src, "polygon_to_boundary_lines")?.clone();
        let sr = self.get(src, "polygon_to_boundary_lines")?.spatial_ref();
        let paths = features
            .iter()
            .map(|f| {
                let mut path = f.ring.clone();
                if let Some(first) = path.first().copied() {
                    path.push(first);
                }
                path
            })
            .collect();
        self.put(dst, Dataset::Lines { paths, sr }, "polygon_to_boundary_lines")
    }

    fn vertices_to_points(&mut self, src: &str, dst: &str) -> EngineResult<()> {
        self.bump("vertices_to_points");
        let features = self.polygons(src, "vertices_to_points")?.clone();
        let sr = self.get(src, "vertices_to_points")?.spatial_ref();
        let points = features
            .iter()
            .flat_map(|f| f.ring.iter())
            .map(|&position| MeasuredPoint {
                position,
                near_dist: None,
            })
            .collect();
        self.put(dst, Dataset::Points { points, sr }, "vertices_to_points")
    }

    fn nearest_distances(&mut self, points: &str, target: &str) -> EngineResult<Vec<Option<f64>>> {
        self.bump("nearest_distances");
        let segments = self.segments_of(target, "nearest_distances")?;
        let dataset = self.datasets.get_mut(points).ok_or_else(|| {
            EngineError::new(
                "nearest_distances",
                format!("dataset `{points}` does not exist"),
            )
        })?;
        let measured = match dataset {
            Dataset::Points { points, .. } => points,
            _ => {
                return Err(EngineError::new(
                    "nearest_distances",
                    format!("dataset `{points}` is not a point layer"),
                ));
            }
        };

        let mut distances = Vec::with_capacity(measured.len());
        for point in measured.iter_mut() {
            let nearest = segments
                .iter()
                .map(|&(a, b)| point_segment_distance(point.position, a, b))
                .fold(None, |best: Option<f64>, d| {
                    Some(best.map_or(d, |b| b.min(d)))
                });
            point.near_dist = nearest;
            distances.push(nearest);
        }
        Ok(distances)
    }

    fn densify(&mut self, layer: &str, interval: f64) -> EngineResult<()> {
        self.bump("densify");
        if interval <= 0.0 {
            return Err(EngineError::new("densify", "interval must be positive"));
        }
        match self.datasets.get_mut(layer) {
            Some(Dataset::Polygons { features, .. }) => {
                for feature in features.iter_mut() {
                    feature.ring = densify_ring(&feature.ring, interval);
                }
                Ok(())
            }
            _ => Err(EngineError::new(
                "densify",
                format!("dataset `{layer}` is not a polygon layer"),
            )),
        }
    }

    fn snap(&mut self, layer: &str, rules: &[SnapRule]) -> EngineResult<()> {
        self.bump("snap");
        for rule in rules {
            let targets: Vec<P2> = match rule.mode {
                SnapMode::Vertex => self.vertices_of(&rule.reference, "snap")?,
                SnapMode::Edge => Vec::new(),
            };
            let segments: Vec<(P2, P2)> = match rule.mode {
                SnapMode::Edge => self.segments_of(&rule.reference, "snap")?,
                SnapMode::Vertex => Vec::new(),
            };

            let features = match self.datasets.get_mut(layer) {
                Some(Dataset::Polygons { features, .. }) => features,
                _ => {
                    return Err(EngineError::new(
                        "snap",
                        format!("dataset `{layer}` is not a polygon layer"),
                    ));
                }
            };

            for feature in features.iter_mut() {
                for vertex in feature.ring.iter_mut() {
                    let candidate = match rule.mode {
                        SnapMode::Edge => segments
                            .iter()
                            .map(|&(a, b)| nearest_on_segment(*vertex, a, b))
                            .min_by(|p, q| {
                                let dp = (p - *vertex).norm();
                                let dq = (q - *vertex).norm();
                                dp.partial_cmp(&dq).unwrap_or(std::cmp::Ordering::Equal)
                            }),
                        SnapMode::Vertex => targets
                            .iter()
                            .copied()
                            .min_by(|p, q| {
                                let dp = (p - *vertex).norm();
                                let dq = (q - *vertex).norm();
                                dp.partial_cmp(&dq).unwrap_or(std::cmp::Ordering::Equal)
                            }),
                    };
                    if let Some(target) = candidate {
                        if (target - *vertex).norm() <= rule.tolerance {
                            *vertex = target;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn intersect(&mut self, inputs: &[&str], dst: &str) -> EngineResult<()> {
        self.bump("intersect");
        if inputs.len() != 2 {
            return Err(EngineError::new(
                "intersect",
                format!("expected two polygon layers, got {}", inputs.len()),
            ));
        }
        let a = self.polygons(inputs[0], "intersect")?.clone();
        let b = self.polygons(inputs[1], "intersect")?.clone();
        let sr = self.get(inputs[0], "intersect")?.spatial_ref();

        let mut out = Vec::new();
        for fa in &a {
            for fb in &b {
                let ring = intersect_convex(&fa.ring, &fb.ring);
                if ring_area(&ring) > AREA_EPS {
                    out.push(PolyFeature::new(ring));
                }
            }
        }
        self.put(dst, Dataset::Polygons { features: out, sr }, "intersect")
    }

    fn erase(&mut self, subject: &str, eraser: &str, dst: &str) -> EngineResult<()> {
        self.bump("erase");
        self.erase_impl(subject, eraser, dst, "erase")
    }

    fn pairwise_erase(&mut self, subject: &str, eraser: &str, dst: &str) -> EngineResult<()> {
        self.bump("pairwise_erase");
        self.erase_impl(subject, eraser, dst, "pairwise_erase")
    }

    fn overlay_identity(&mut self, subject: &str, eraser: &str, dst: &str) -> EngineResult<()> {
        self.bump("overlay_identity");
        if self.take_failure("overlay_identity") {
            return Err(EngineError::new("overlay_identity", "injected failure"));
        }
        let subject_features = self.polygons(subject, "overlay_identity")?.clone();
        let eraser_rings: Vec<Vec<P2>> = self
            .polygons(eraser, "overlay_identity")?
            .iter()
            .map(|f| f.ring.clone())
            .collect();
        let sr = self.get(subject, "overlay_identity")?.spatial_ref();
        let field = format!("FID_{}", base_name(eraser));

        let mut out = Vec::new();
        for feature in &subject_features {
            // Pieces untouched by any eraser feature are tagged -1.
            let mut pieces = vec![feature.ring.clone()];
            for eraser_ring in &eraser_rings {
                pieces = pieces
                    .iter()
                    .flat_map(|piece| erase_convex(piece, eraser_ring))
                    .collect();
            }
            for ring in pieces {
                if ring_area(&ring) > AREA_EPS {
                    let mut tagged = PolyFeature::new(ring);
                    if !self.suppress_tagging {
                        tagged.fields.insert(field.clone(), -1);
                    }
                    out.push(tagged);
                }
            }
            // Pieces inside an eraser feature carry its index.
            for (index, eraser_ring) in eraser_rings.iter().enumerate() {
                let ring = intersect_convex(&feature.ring, eraser_ring);
                if ring_area(&ring) > AREA_EPS {
                    let mut tagged = PolyFeature::new(ring);
                    if !self.suppress_tagging {
                        tagged.fields.insert(field.clone(), index as i64);
                    }
                    out.push(tagged);
                }
            }
        }
        self.put(dst, Dataset::Polygons { features: out, sr }, "overlay_identity")
    }

    fn list_fields(&self, layer: &str) -> EngineResult<Vec<String>> {
        let features = self.polygons(layer, "list_fields")?;
        let mut names: Vec<String> = features
            .iter()
            .flat_map(|f| f.fields.keys().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        Ok(names)
    }

    fn select_copy(&mut self, src: &str, field: &str, value: i64, dst: &str) -> EngineResult<()> {
        self.bump("select_copy");
        let features = self.polygons(src, "select_copy")?.clone();
        let sr = self.get(src, "select_copy")?.spatial_ref();
        let selected = features
            .into_iter()
            .filter(|f| f.fields.get(field) == Some(&value))
            .collect();
        self.put(
            dst,
            Dataset::Polygons {
                features: selected,
                sr,
            },
            "select_copy",
        )
    }

    fn simplify_polygon(
        &mut self,
        src: &str,
        dst: &str,
        algorithm: SimplifyAlgorithm,
        tolerance: f64,
    ) -> EngineResult<()> {
        self.bump("simplify_polygon");
        if self.take_failure("simplify_polygon") {
            return Err(EngineError::new("simplify_polygon", "injected failure"));
        }
        if tolerance <= 0.0 {
            return Err(EngineError::new(
                "simplify_polygon",
                "tolerance must be positive",
            ));
        }
        let features = self.polygons(src, "simplify_polygon")?.clone();
        let sr = self.get(src, "simplify_polygon")?.spatial_ref();
        let simplified = features
            .into_iter()
            .map(|f| {
                let ring = match algorithm {
                    SimplifyAlgorithm::PointRemove => simplify_ring_point_remove(&f.ring, tolerance),
                    SimplifyAlgorithm::RadialDistance => simplify_ring_radial(&f.ring, tolerance),
                };
                PolyFeature::new(ring)
            })
            .collect();
        self.put(
            dst,
            Dataset::Polygons {
                features: simplified,
                sr,
            },
            "simplify_polygon",
        )
    }

    fn clear_workspace_cache(&mut self, _workspace: &str) -> EngineResult<()> {
        self.bump("clear_workspace_cache");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Planar geometry helpers (convex rings)
// ---------------------------------------------------------------------------

fn to_points(ring: &[[f64; 2]]) -> Vec<P2> {
    ring.iter().map(|&[x, y]| Point2::new(x, y)).collect()
}

/// Closed-ring edges, including the wrap-around edge.
fn ring_edges(ring: &[P2]) -> impl Iterator<Item = (P2, P2)> + '_ {
    let n = ring.len();
    (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
}

fn signed_area(ring: &[P2]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    ring_edges(ring)
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum::<f64>()
        / 2.0
}

fn ring_area(ring: &[P2]) -> f64 {
    signed_area(ring).abs()
}

fn normalize_ccw(mut ring: Vec<P2>) -> Vec<P2> {
    if signed_area(&ring) < 0.0 {
        ring.reverse();
    }
    ring
}

fn nearest_on_segment(p: P2, a: P2, b: P2) -> P2 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq <= f64::EPSILON {
        return a;
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

fn point_segment_distance(p: P2, a: P2, b: P2) -> f64 {
    (p - nearest_on_segment(p, a, b)).norm()
}

/// Clip a ring against the half-plane on one side of the directed line
/// `a -> b` (left side when `keep_left`). Sutherland-Hodgman step.
fn clip_half_plane(ring: &[P2], a: P2, b: P2, keep_left: bool) -> Vec<P2> {
    if ring.len() < 3 {
        return Vec::new();
    }
    let d = b - a;
    let side = |p: P2| {
        let s = d.x * (p.y - a.y) - d.y * (p.x - a.x);
        if keep_left {
            s
        } else {
            -s
        }
    };

    let mut out = Vec::with_capacity(ring.len() + 1);
    for (current, next) in ring_edges(ring) {
        let sc = side(current);
        let sn = side(next);
        if sc >= -SIDE_EPS {
            out.push(current);
        }
        if (sc > SIDE_EPS && sn < -SIDE_EPS) || (sc < -SIDE_EPS && sn > SIDE_EPS) {
            let t = sc / (sc - sn);
            out.push(current + (next - current) * t);
        }
    }
    out
}

/// Intersection of two convex CCW rings.
fn intersect_convex(subject: &[P2], clip: &[P2]) -> Vec<P2> {
    let mut result = subject.to_vec();
    for (a, b) in ring_edges(clip) {
        result = clip_half_plane(&result, a, b, true);
        if result.len() < 3 {
            return Vec::new();
        }
    }
    result
}

/// `subject` minus `clip` for convex CCW rings, as a set of convex pieces.
///
/// Walks the clip ring's edges, peeling off the part of the subject outside
/// each edge's half-plane and continuing with the part inside.
fn erase_convex(subject: &[P2], clip: &[P2]) -> Vec<Vec<P2>> {
    let mut pieces = Vec::new();
    let mut remaining = subject.to_vec();
    for (a, b) in ring_edges(clip) {
        let outside = clip_half_plane(&remaining, a, b, false);
        if ring_area(&outside) > AREA_EPS {
            pieces.push(outside);
        }
        remaining = clip_half_plane(&remaining, a, b, true);
        if remaining.len() < 3 {
            break;
        }
    }
    pieces
}

fn densify_ring(ring: &[P2], interval: f64) -> Vec<P2> {
    let mut out = Vec::with_capacity(ring.len() * 2);
    for (a, b) in ring_edges(ring) {
        out.push(a);
        let length = (b - a).norm();
        if length <= interval {
            continue;
        }
        let steps = (length / interval).ceil() as usize;
        for step in 1..steps {
            let t = step as f64 / steps as f64;
            out.push(a + (b - a) * t);
        }
    }
    out
}

/// Douglas-Peucker over an open polyline: marks kept indices.
fn rdp_mark(points: &[P2], tolerance: f64, first: usize, last: usize, keep: &mut [bool]) {
    if last <= first + 1 {
        return;
    }
    let (mut max_dist, mut max_index) = (0.0_f64, first);
    for i in (first + 1)..last {
        let dist = point_segment_distance(points[i], points[first], points[last]);
        if dist > max_dist {
            max_dist = dist;
            max_index = i;
        }
    }
    if max_dist > tolerance {
        keep[max_index] = true;
        rdp_mark(points, tolerance, first, max_index, keep);
        rdp_mark(points, tolerance, max_index, last, keep);
    }
}

/// Point-removal simplification of a closed ring. Keeps the ring valid:
/// falls back to the input if simplification would degenerate it.
fn simplify_ring_point_remove(ring: &[P2], tolerance: f64) -> Vec<P2> {
    if ring.len() <= 3 {
        return ring.to_vec();
    }
    // Treat the ring as an open polyline with the first vertex repeated.
    let mut closed = ring.to_vec();
    closed.push(ring[0]);
    let last = closed.len() - 1;
    let mut keep = vec![false; closed.len()];
    keep[0] = true;
    keep[last] = true;
    rdp_mark(&closed, tolerance, 0, last, &mut keep);

    let simplified: Vec<P2> = closed[..closed.len() - 1]
        .iter()
        .zip(keep.iter())
        .filter_map(|(p, &k)| k.then_some(*p))
        .collect();
    if simplified.len() >= 3 {
        simplified
    } else {
        ring.to_vec()
    }
}

/// Radial-distance simplification of a closed ring.
fn simplify_ring_radial(ring: &[P2], tolerance: f64) -> Vec<P2> {
    if ring.len() <= 3 {
        return ring.to_vec();
    }
    let mut out: Vec<P2> = vec![ring[0]];
    for &p in &ring[1..] {
        let last = out[out.len() - 1];
        if (p - last).norm() >= tolerance {
            out.push(p);
        }
    }
    if out.len() >= 3 {
        out
    } else {
        ring.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SnapRule;

    fn square(x0: f64, y0: f64, size: f64) -> Vec<[f64; 2]> {
        vec![
            [x0, y0],
            [x0 + size, y0],
            [x0 + size, y0 + size],
            [x0, y0 + size],
        ]
    }

    #[test]
    fn test_ring_area_square() {
        let ring = to_points(&square(0.0, 0.0, 10.0));
        assert!((ring_area(&ring) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_reverses_clockwise_ring() {
        let cw = vec![
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 10.0),
            Point2::new(10.0, 10.0),
            Point2::new(10.0, 0.0),
        ];
        let ccw = normalize_ccw(cw);
        assert!(signed_area(&ccw) > 0.0);
    }

    #[test]
    fn test_point_segment_distance() {
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(10.0, 0.0);
        assert!((point_segment_distance(Point2::new(5.0, 3.0), a, b) - 3.0).abs() < 1e-9);
        // Beyond the endpoint, distance is to the endpoint.
        let d = point_segment_distance(Point2::new(13.0, 4.0), a, b);
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_intersect_convex_overlap_area() {
        let a = to_points(&square(0.0, 0.0, 10.0));
        let b = to_points(&square(5.0, 0.0, 10.0));
        let overlap = intersect_convex(&a, &b);
        assert!((ring_area(&overlap) - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_intersect_convex_disjoint_is_empty() {
        let a = to_points(&square(0.0, 0.0, 10.0));
        let b = to_points(&square(20.0, 0.0, 5.0));
        assert!(intersect_convex(&a, &b).is_empty());
    }

    #[test]
    fn test_erase_convex_areas_sum() {
        let a = to_points(&square(0.0, 0.0, 10.0));
        let b = to_points(&square(5.0, 0.0, 10.0));
        let pieces = erase_convex(&a, &b);
        let total: f64 = pieces.iter().map(|p| ring_area(p)).sum();
        assert!((total - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_erase_convex_no_overlap_returns_subject() {
        let a = to_points(&square(0.0, 0.0, 10.0));
        let b = to_points(&square(30.0, 0.0, 5.0));
        let pieces = erase_convex(&a, &b);
        let total: f64 = pieces.iter().map(|p| ring_area(p)).sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_densify_spacing() {
        let ring = to_points(&square(0.0, 0.0, 10.0));
        let dense = densify_ring(&ring, 2.0);
        assert_eq!(dense.len(), 4 * 5);
        for (a, b) in ring_edges(&dense) {
            assert!((b - a).norm() <= 2.0 + 1e-9);
        }
        // Densification preserves the outline.
        assert!((ring_area(&dense) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_point_remove_drops_collinear_vertices() {
        let ring = to_points(&square(0.0, 0.0, 10.0));
        let dense = densify_ring(&ring, 1.0);
        let simplified = simplify_ring_point_remove(&dense, 0.2);
        assert_eq!(simplified.len(), 4);
        assert!((ring_area(&simplified) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_radial_distance_simplification_thins_dense_rings() {
        let mut engine = MemoryEngine::new();
        engine.insert_polygon_layer("in/a", 2277, vec![square(0.0, 0.0, 10.0)]);
        engine.densify("in/a", 1.0).unwrap();
        let dense_len = engine.polygon_rings("in/a").unwrap()[0].len();

        engine
            .simplify_polygon(
                "in/a",
                "memory/a_radial",
                SimplifyAlgorithm::RadialDistance,
                1.5,
            )
            .unwrap();
        let ring = &engine.polygon_rings("memory/a_radial").unwrap()[0];
        // Every surviving vertex is at least the tolerance from the previous
        // kept one, so the densified run thins out.
        assert!(ring.len() >= 3);
        assert!(ring.len() < dense_len);
        for pair in ring.windows(2) {
            let dx = pair[1][0] - pair[0][0];
            let dy = pair[1][1] - pair[0][1];
            assert!((dx * dx + dy * dy).sqrt() >= 1.5);
        }
    }

    #[test]
    fn test_nearest_distances_annotates_points() {
        let mut engine = MemoryEngine::new();
        engine.insert_polygon_layer("in/a", 2277, vec![square(0.0, 0.0, 4.0)]);
        engine.insert_polygon_layer("in/b", 2277, vec![square(10.0, 0.0, 4.0)]);
        engine.polygon_to_boundary_lines("in/b", "memory/b_lines").unwrap();
        engine.vertices_to_points("in/a", "memory/a_verts").unwrap();
        let distances = engine
            .nearest_distances("memory/a_verts", "memory/b_lines")
            .unwrap();
        assert_eq!(distances.len(), 4);
        // Right-edge vertices of A are 6 units from B's left edge.
        let min = distances
            .iter()
            .flatten()
            .fold(f64::INFINITY, |m, &d| m.min(d));
        assert!((min - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_snap_moves_only_within_tolerance() {
        let mut engine = MemoryEngine::new();
        engine.insert_polygon_layer("out/a", 2277, vec![square(0.0, 0.0, 7.0)]);
        engine.insert_polygon_layer("out/b", 2277, vec![square(10.0, 0.0, 10.0)]);
        engine
            .snap("out/a", &[SnapRule::edge("out/b", 3.0)])
            .unwrap();
        let rings = engine.polygon_rings("out/a").unwrap();
        for vertex in &rings[0] {
            // Right-edge vertices (7, y) moved to x = 10; the rest stayed.
            assert!(vertex[0] == 0.0 || vertex[0] == 10.0);
        }
    }

    #[test]
    fn test_locked_dataset_rejects_delete() {
        let mut engine = MemoryEngine::new();
        engine.insert_polygon_layer("out/a", 2277, vec![square(0.0, 0.0, 1.0)]);
        engine.lock("out/a");
        assert!(engine.delete("out/a").is_err());
        engine.unlock("out/a");
        assert!(engine.delete("out/a").is_ok());
    }

    #[test]
    fn test_rejected_workspace_blocks_writes() {
        let mut engine = MemoryEngine::new();
        engine.insert_polygon_layer("in/a", 2277, vec![square(0.0, 0.0, 1.0)]);
        engine.reject_workspace("memory");
        assert!(engine.copy("in/a", "memory/a_copy").is_err());
        assert!(engine.copy("in/a", "scratch/a_copy").is_ok());
    }

    #[test]
    fn test_overlay_identity_tags_and_filters() {
        let mut engine = MemoryEngine::new();
        engine.insert_polygon_layer("out/a", 2277, vec![square(0.0, 0.0, 10.0)]);
        engine.insert_polygon_layer("out/b", 2277, vec![square(5.0, 0.0, 10.0)]);
        engine
            .overlay_identity("out/a", "out/b", "memory/id_tmp")
            .unwrap();
        let fields = engine.list_fields("memory/id_tmp").unwrap();
        assert_eq!(fields, vec!["FID_b".to_string()]);
        engine
            .select_copy("memory/id_tmp", "FID_b", -1, "memory/outside")
            .unwrap();
        let area = engine.layer_area("memory/outside").unwrap();
        assert!((area - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_layer_file_round_trip() {
        let mut engine = MemoryEngine::new();
        engine.insert_polygon_layer("in/a", 2277, vec![square(0.0, 0.0, 10.0)]);
        let file = engine.export_layer_file("in/a").unwrap();
        assert_eq!(file.wkid, 2277);
        let json = serde_json::to_string(&file).unwrap();
        let parsed: PolygonLayerFile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.polygons, file.polygons);
    }
}
