//! Data-driven snap tolerance estimation.
//!
//! The tolerance is picked from the distribution of vertex-to-boundary
//! distances rather than from a fixed constant: a high percentile absorbs a
//! small fraction of outlier vertices (digitizing noise, intentional gaps)
//! while still covering the bulk of near-coincident vertices. The hard cap
//! prevents runaway snapping that would merge unrelated boundaries, and the
//! floor guarantees a minimum useful snap radius on near-perfect data.

use crate::error::{AlignError, AlignResult};

/// Parameters for tolerance estimation.
#[derive(Debug, Clone, Copy)]
pub struct ToleranceParams {
    /// Rank of the selected sample, in `[0, 1]`.
    pub percentile: f64,
    /// Lower clamp for the selected value.
    pub floor_min: f64,
    /// Upper clamp for the selected value.
    pub cap_max: f64,
}

impl Default for ToleranceParams {
    fn default() -> Self {
        Self {
            percentile: 0.95,
            floor_min: 0.5,
            cap_max: 10.0,
        }
    }
}

impl ToleranceParams {
    /// Params with a custom percentile and cap, keeping the default floor.
    pub fn new(percentile: f64, cap_max: f64) -> Self {
        Self {
            percentile,
            cap_max,
            ..Default::default()
        }
    }
}

/// Estimate a snap tolerance from a sample of nearest distances.
///
/// Sorts the sample ascending, selects the value at index
/// `round(percentile * (n - 1))` (clamped into `[0, n - 1]`), raises the
/// selected value to `floor_min`, then caps it at `cap_max`. The cap wins
/// when the two conflict. Order of the input is irrelevant; sorting is
/// internal.
///
/// # Errors
///
/// Returns [`AlignError::EmptySample`] for an empty sample. No tolerance can
/// be inferred without data, so this is fatal to the pipeline.
pub fn estimate(distances: &[f64], params: &ToleranceParams) -> AlignResult<f64> {
    if distances.is_empty() {
        return Err(AlignError::empty_sample(
            "the distance sample is empty; check that the moving layer has vertices",
        ));
    }

    let mut sorted = distances.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let raw = (params.percentile * (n - 1) as f64).round() as isize;
    let index = raw.clamp(0, (n - 1) as isize) as usize;

    Ok(sorted[index].max(params.floor_min).min(params.cap_max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(percentile: f64, floor_min: f64, cap_max: f64) -> ToleranceParams {
        ToleranceParams {
            percentile,
            floor_min,
            cap_max,
        }
    }

    #[test]
    fn test_single_sample() {
        // One vertex 3.0 from the reference: tolerance is exactly that.
        let tol = estimate(&[3.0], &params(0.95, 0.5, 10.0)).unwrap();
        assert_eq!(tol, 3.0);
    }

    #[test]
    fn test_result_within_bounds() {
        let tol = estimate(&[0.1, 0.2, 4.0, 25.0], &params(0.95, 0.5, 10.0)).unwrap();
        assert!((0.5..=10.0).contains(&tol));
    }

    #[test]
    fn test_floor_saturation() {
        // All values below the floor: result is the floor.
        let tol = estimate(&[0.01, 0.02, 0.03], &params(0.95, 0.5, 10.0)).unwrap();
        assert_eq!(tol, 0.5);
    }

    #[test]
    fn test_cap_saturation() {
        // All values above the cap: result is the cap.
        let tol = estimate(&[50.0, 60.0, 70.0], &params(0.95, 0.5, 10.0)).unwrap();
        assert_eq!(tol, 10.0);
    }

    #[test]
    fn test_cap_below_floor_caps_the_result() {
        // A cap tighter than the default floor wins; nothing panics.
        let tol = estimate(&[1.0], &ToleranceParams::new(0.95, 0.3)).unwrap();
        assert_eq!(tol, 0.3);
        // Values below the floor are first raised, then capped.
        let tol = estimate(&[0.1], &ToleranceParams::new(0.95, 0.3)).unwrap();
        assert_eq!(tol, 0.3);
    }

    #[test]
    fn test_order_invariance() {
        let p = params(0.75, 0.5, 100.0);
        let a = estimate(&[1.0, 9.0, 3.0, 7.0, 5.0], &p).unwrap();
        let b = estimate(&[9.0, 7.0, 5.0, 3.0, 1.0], &p).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_percentile_extremes() {
        let p0 = params(0.0, 0.0, 100.0);
        let p1 = params(1.0, 0.0, 100.0);
        let sample = [4.0, 2.0, 8.0, 6.0];
        assert_eq!(estimate(&sample, &p0).unwrap(), 2.0);
        assert_eq!(estimate(&sample, &p1).unwrap(), 8.0);
    }

    #[test]
    fn test_empty_sample_is_fatal() {
        let err = estimate(&[], &ToleranceParams::default()).unwrap_err();
        assert!(matches!(err, AlignError::EmptySample { .. }));
    }

    #[test]
    fn test_default_params_match_field_settings() {
        let p = ToleranceParams::default();
        assert_eq!(p.percentile, 0.95);
        assert_eq!(p.floor_min, 0.5);
        assert_eq!(p.cap_max, 10.0);
    }
}
