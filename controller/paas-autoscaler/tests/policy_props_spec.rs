//! Property tests for the scaling policy

use paas_autoscaler::policy::{desired, MAX_DOWNSCALE_STEP};
use proptest::prelude::*;

/// (min, max, current) with min <= current <= max
fn bounds() -> impl Strategy<Value = (u32, u32, u32)> {
    (0u32..50, 0u32..100)
        .prop_flat_map(|(min, span)| (Just(min), Just(min + span), min..=min + span))
}

proptest! {
    #[test]
    fn result_stays_within_bounds(
        (min, max, current) in bounds(),
        demand in 0.0f64..1.0e7,
        capacity in 1.0f64..5000.0,
    ) {
        let result = desired(demand, capacity, current, min, max);
        prop_assert!(result >= min);
        prop_assert!(result <= max);
    }

    #[test]
    fn scale_down_is_limited_per_cycle(
        (min, max, current) in bounds(),
        demand in 0.0f64..1.0e7,
        capacity in 1.0f64..5000.0,
    ) {
        let result = desired(demand, capacity, current, min, max);
        prop_assert!(result + MAX_DOWNSCALE_STEP >= current);
    }

    #[test]
    fn more_demand_never_means_fewer_instances(
        (min, max, current) in bounds(),
        demand in 0.0f64..1.0e6,
        extra in 0.0f64..1.0e6,
        capacity in 1.0f64..5000.0,
    ) {
        let low = desired(demand, capacity, current, min, max);
        let high = desired(demand + extra, capacity, current, min, max);
        prop_assert!(high >= low);
    }

    #[test]
    fn repeated_cycles_settle_on_the_clamped_count(
        (min, max, current) in bounds(),
        demand in 0.0f64..1.0e6,
        capacity in 1.0f64..5000.0,
    ) {
        let target = ((demand / capacity).ceil() as u32).clamp(min, max);
        let mut instances = current;
        for _ in 0..=(current / MAX_DOWNSCALE_STEP) {
            instances = desired(demand, capacity, instances, min, max);
        }
        prop_assert_eq!(instances, target);
        prop_assert_eq!(desired(demand, capacity, instances, min, max), target);
    }

    #[test]
    fn desired_is_idempotent(
        (min, max, current) in bounds(),
        demand in 0.0f64..1.0e7,
        other_demand in 0.0f64..1.0e7,
        capacity in 1.0f64..5000.0,
    ) {
        let first = desired(demand, capacity, current, min, max);
        // An unrelated evaluation in between must not leak into the next one
        desired(other_demand, capacity, current, min, max);
        let second = desired(demand, capacity, current, min, max);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn negative_demand_counts_as_idle(
        (min, max, current) in bounds(),
        demand in -1.0e6f64..0.0,
        capacity in 1.0f64..5000.0,
    ) {
        prop_assert_eq!(
            desired(demand, capacity, current, min, max),
            desired(0.0, capacity, current, min, max)
        );
    }
}
