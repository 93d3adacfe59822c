//! End-to-end pipeline runs against the in-memory engine.
//!
//! Fixture: moving layer A is a triangle whose vertical right edge sits
//! exactly 3.0 units from reference layer B's left edge, with one far-away
//! apex. With the median percentile the derived tolerance is 3.0, so the
//! right edge snaps flush onto B while the apex stays put.

use layer_snap::{
    AlignConfig, AlignError, AlignPipeline, GeometryEngine, MemoryEngine, WorkspaceResolver,
};

fn triangle_a() -> Vec<Vec<[f64; 2]>> {
    vec![vec![[7.0, 0.0], [7.0, 10.0], [-5.0, 5.0]]]
}

fn square_b() -> Vec<Vec<[f64; 2]>> {
    vec![vec![[10.0, 0.0], [20.0, 0.0], [20.0, 10.0], [10.0, 10.0]]]
}

fn seeded_engine() -> MemoryEngine {
    let mut engine = MemoryEngine::new();
    engine.insert_polygon_layer("in/a", 2277, triangle_a());
    engine.insert_polygon_layer("in/b", 2277, square_b());
    engine
}

fn config() -> AlignConfig {
    AlignConfig {
        near_percentile: 0.5,
        ..Default::default()
    }
}

fn resolver() -> WorkspaceResolver {
    WorkspaceResolver::standard("memory", "scratch", "out")
}

fn pipeline(engine: MemoryEngine) -> AlignPipeline<MemoryEngine> {
    AlignPipeline::new(engine, config(), resolver())
}

#[test]
fn test_snap_and_trim_produces_disjoint_output() {
    let mut pipeline = pipeline(seeded_engine());
    let report = pipeline.run("in/a", "in/b").unwrap();

    assert!((report.tolerance - 3.0).abs() < 1e-9);
    assert_eq!(report.a_output, "out/a_aligned");
    assert_eq!(report.b_output, "out/b_reference");
    assert_eq!(report.overlap_diagnostic.as_deref(), Some("out/overlap_diag"));

    let mut engine = pipeline.into_engine();
    assert!(engine.exists(&report.a_output));
    assert!(engine.layer_area(&report.a_output).unwrap() > 0.0);

    // The snap only moved A up to B's boundary, so the pre-trim overlap
    // diagnostic is already empty.
    let diag_area = engine.layer_area("out/overlap_diag").unwrap();
    assert!(diag_area < 1e-6);

    // The final output shares no area with the reference.
    engine
        .intersect(&[&report.a_output, &report.b_output], "scratch/check")
        .unwrap();
    assert!(engine.layer_area("scratch/check").unwrap() < 1e-6);
}

#[test]
fn test_snapped_edge_lands_on_reference_boundary() {
    let mut pipeline = pipeline(seeded_engine());
    let report = pipeline.run("in/a", "in/b").unwrap();
    let engine = pipeline.engine();

    let rings = engine.polygon_rings(&report.a_output).unwrap();
    let mut on_boundary = 0usize;
    for vertex in rings.iter().flatten() {
        // Nothing overshoots into the reference.
        assert!(vertex[0] <= 10.0 + 1e-9);
        if (vertex[0] - 10.0).abs() < 1e-9 {
            on_boundary += 1;
        }
    }
    assert!(on_boundary >= 2, "the snapped edge should lie on x = 10");
}

#[test]
fn test_empty_moving_layer_fails_before_snap() {
    let mut engine = MemoryEngine::new();
    engine.insert_polygon_layer("in/a", 2277, Vec::new());
    engine.insert_polygon_layer("in/b", 2277, square_b());

    let mut pipeline = pipeline(engine);
    let err = pipeline.run("in/a", "in/b").unwrap_err();
    assert!(matches!(err, AlignError::EmptySample { .. }));
    assert_eq!(err.code().as_str(), "ALIGN-2001");

    // The failure happened before staging, snapping or trimming.
    let engine = pipeline.into_engine();
    assert!(!engine.exists("out/a_aligned"));
    assert_eq!(engine.op_count("snap"), 0);
    assert_eq!(engine.op_count("erase"), 0);
}

#[test]
fn test_locked_output_reroutes_to_suffixed_name() {
    let mut engine = seeded_engine();
    // A previous run's output, held open by another process.
    engine.insert_polygon_layer("out/a_aligned", 2277, square_b());
    engine.lock("out/a_aligned");
    let prior = engine.polygon_rings("out/a_aligned").unwrap();

    let mut pipeline = pipeline(engine);
    let report = pipeline.run("in/a", "in/b").unwrap();

    assert_ne!(report.a_output, "out/a_aligned");
    assert!(report.a_output.starts_with("out/a_aligned_"));

    let engine = pipeline.into_engine();
    assert!(engine.exists(&report.a_output));
    // The locked dataset was never touched.
    assert_eq!(engine.polygon_rings("out/a_aligned").unwrap(), prior);
}

#[test]
fn test_rerun_yields_distinct_equivalent_outputs() {
    let mut first = pipeline(seeded_engine());
    let report_one = first.run("in/a", "in/b").unwrap();

    let mut engine = first.into_engine();
    engine.lock(&report_one.a_output);
    engine.lock(&report_one.b_output);
    engine.lock(report_one.overlap_diagnostic.as_ref().unwrap());

    let mut second = pipeline(engine);
    let report_two = second.run("in/a", "in/b").unwrap();

    assert_ne!(report_one.a_output, report_two.a_output);
    assert_ne!(report_one.b_output, report_two.b_output);

    let engine = second.into_engine();
    let area_one = engine.layer_area(&report_one.a_output).unwrap();
    let area_two = engine.layer_area(&report_two.a_output).unwrap();
    assert!((area_one - area_two).abs() < 1e-6);
}

#[test]
fn test_simplify_failure_is_nonfatal() {
    let mut engine = seeded_engine();
    engine.fail_next("simplify_polygon", 1);

    let mut pipeline = pipeline(engine);
    let report = pipeline.run("in/a", "in/b").unwrap();

    assert!(!report.simplify_applied);
    assert!(report
        .stage_log
        .iter()
        .any(|msg| msg.starts_with("Simplify skipped")));

    // The trimmed output stands as the final result.
    let engine = pipeline.into_engine();
    assert!(engine.layer_area(&report.a_output).unwrap() > 0.0);
}

#[test]
fn test_erase_fallback_feeds_the_trim_stage() {
    let mut engine = seeded_engine();
    engine.fail_next("erase", 1);

    let mut pipeline = pipeline(engine);
    let report = pipeline.run("in/a", "in/b").unwrap();
    assert!(report
        .stage_log
        .iter()
        .any(|msg| msg.contains("pairwise_erase")));

    let engine = pipeline.into_engine();
    assert!(engine.layer_area(&report.a_output).unwrap() > 0.0);
}

#[test]
fn test_probe_tolerance_creates_no_outputs() {
    let mut pipeline = pipeline(seeded_engine());
    let tolerance = pipeline.probe_tolerance("in/a", "in/b").unwrap();
    assert!((tolerance - 3.0).abs() < 1e-9);

    let engine = pipeline.engine();
    assert!(!engine.exists("out/a_aligned"));
    assert_eq!(engine.op_count("snap"), 0);
}

#[test]
fn test_overlap_diagnostic_can_be_disabled() {
    let config = AlignConfig {
        near_percentile: 0.5,
        make_overlap_diag: false,
        ..Default::default()
    };
    let mut pipeline = AlignPipeline::new(seeded_engine(), config, resolver());
    let report = pipeline.run("in/a", "in/b").unwrap();
    assert!(report.overlap_diagnostic.is_none());
    assert!(!pipeline.engine().exists("out/overlap_diag"));
}

#[test]
fn test_reprojection_to_target_wkid() {
    let config = AlignConfig {
        near_percentile: 0.5,
        target_wkid: Some(2277),
        ..Default::default()
    };
    let mut engine = MemoryEngine::new();
    engine.insert_polygon_layer("in/a", 4326, triangle_a());
    engine.insert_polygon_layer("in/b", 2277, square_b());

    let mut pipeline = AlignPipeline::new(engine, config, resolver());
    let report = pipeline.run("in/a", "in/b").unwrap();

    let engine = pipeline.engine();
    assert_eq!(engine.spatial_ref(&report.a_output).unwrap().0, 2277);
    assert_eq!(engine.spatial_ref(&report.b_output).unwrap().0, 2277);
}

#[test]
fn test_stage_log_records_progress_in_order() {
    let mut pipeline = pipeline(seeded_engine());
    let report = pipeline.run("in/a", "in/b").unwrap();

    let log = &report.stage_log;
    assert!(log[0].starts_with("Prepared inputs"));
    assert!(log.iter().any(|m| m.contains("Auto snap tolerance (p50)")));
    assert!(log.iter().any(|m| m.starts_with("Staged outputs")));
    assert!(log.iter().any(|m| m.starts_with("Trimmed overshoot")));

    let trim_index = log
        .iter()
        .position(|m| m.starts_with("Trimmed overshoot"))
        .unwrap();
    let snap_index = log
        .iter()
        .position(|m| m.starts_with("Snapped"))
        .unwrap();
    assert!(snap_index < trim_index);
}
