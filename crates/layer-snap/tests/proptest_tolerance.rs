//! Property tests for tolerance estimation.

use layer_snap::{estimate, ToleranceParams};
use proptest::prelude::*;

proptest! {
    /// The estimate always lands inside the clamp range, for any non-empty
    /// sample and any percentile.
    #[test]
    fn estimate_stays_within_clamp_range(
        sample in prop::collection::vec(0.0f64..1000.0, 1..200),
        percentile in 0.0f64..=1.0,
    ) {
        let params = ToleranceParams { percentile, floor_min: 0.5, cap_max: 10.0 };
        let tolerance = estimate(&sample, &params).unwrap();
        prop_assert!((0.5..=10.0).contains(&tolerance));
    }

    /// Sorting is internal: the input order never changes the result.
    #[test]
    fn estimate_is_order_invariant(
        mut sample in prop::collection::vec(0.0f64..1000.0, 1..100),
        percentile in 0.0f64..=1.0,
    ) {
        let params = ToleranceParams { percentile, floor_min: 0.5, cap_max: 10.0 };
        let forward = estimate(&sample, &params).unwrap();
        sample.reverse();
        let reversed = estimate(&sample, &params).unwrap();
        prop_assert_eq!(forward, reversed);
    }

    /// Percentile 1.0 selects the maximum and 0.0 the minimum, before
    /// clamping.
    #[test]
    fn estimate_extreme_percentiles_select_extremes(
        sample in prop::collection::vec(0.0f64..1000.0, 1..100),
    ) {
        let params = ToleranceParams { percentile: 1.0, floor_min: 0.0, cap_max: f64::MAX };
        let max = sample.iter().cloned().fold(f64::MIN, f64::max);
        prop_assert_eq!(estimate(&sample, &params).unwrap(), max);

        let params = ToleranceParams { percentile: 0.0, floor_min: 0.0, cap_max: f64::MAX };
        let min = sample.iter().cloned().fold(f64::MAX, f64::min);
        prop_assert_eq!(estimate(&sample, &params).unwrap(), min);
    }
}
