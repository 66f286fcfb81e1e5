//! Scaling policy - turns a demand sample into a desired instance count
//!
//! The policy is a pure function of its inputs. Bounds are applied first,
//! then the anti-flap rule limits how far a single cycle may scale down.

/// Most instances a single cycle may remove from an app
pub const MAX_DOWNSCALE_STEP: u32 = 2;

/// Desired instance count for `demand`, given the capacity of one instance
///
/// `unit_capacity` must be positive; the catalog rejects anything else at startup.
pub fn desired(
    demand: f64,
    unit_capacity: f64,
    current: u32,
    min_instances: u32,
    max_instances: u32,
) -> u32 {
    bound(
        instances_for(demand, unit_capacity),
        current,
        min_instances,
        max_instances,
    )
}

/// Clamp `raw` into `[min_instances, max_instances]`, then cap the downscale step
pub fn bound(raw: u32, current: u32, min_instances: u32, max_instances: u32) -> u32 {
    let clamped = raw.clamp(min_instances, max_instances);

    if clamped < current && current - clamped > MAX_DOWNSCALE_STEP {
        current - MAX_DOWNSCALE_STEP
    } else {
        clamped
    }
}

fn instances_for(demand: f64, unit_capacity: f64) -> u32 {
    let raw = (demand.max(0.0) / unit_capacity).ceil();
    // Float-to-int casts saturate, so huge demand lands on u32::MAX and is clamped
    raw as u32
}
