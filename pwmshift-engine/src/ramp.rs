//! Timed linear ramps between color triples.

use std::time::Duration;

use log::debug;

use crate::cancel::CancelToken;
use crate::level::{ColorTriple, Intensity, SharedOutput};
use crate::lock;

/// Time between two ramp writes.
pub const STEP_INTERVAL_MS: u32 = 5;

/// How a ramp ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampOutcome {
    /// The output reached the target.
    Completed,
    /// The token was cancelled; the output holds the last partial value.
    Cancelled,
}

/// Number of writes a ramp of `duration_ms` performs. Never zero.
#[must_use]
pub fn step_count(duration_ms: u32) -> u32 {
    (duration_ms / STEP_INTERVAL_MS).max(1)
}

/// Linearly move the output from its current triple to `target` over `duration_ms`.
///
/// Each step writes to the sink and then sleeps [`STEP_INTERVAL_MS`]. The
/// final step writes `target` exactly, so short durations still land on it.
pub fn ramp(
    output: &SharedOutput,
    target: ColorTriple,
    duration_ms: u32,
    token: &CancelToken,
) -> RampOutcome {
    let steps = step_count(duration_ms);
    let start = lock(output).current();
    debug!("Ramp {start:?} -> {target:?} over {duration_ms}ms ({steps} steps)");

    let delta = |from: Intensity, to: Intensity| (to.get() - from.get()) / f64::from(steps);
    let (dr, dg, db) = (
        delta(start.r, target.r),
        delta(start.g, target.g),
        delta(start.b, target.b),
    );
    let step_sleep = Duration::from_millis(u64::from(STEP_INTERVAL_MS));

    for i in 1..=steps {
        if token.is_cancelled() {
            return RampOutcome::Cancelled;
        }

        let levels = if i == steps {
            target
        } else {
            let n = f64::from(i);
            ColorTriple::new(
                Intensity::new(start.r.get() + dr * n),
                Intensity::new(start.g.get() + dg * n),
                Intensity::new(start.b.get() + db * n),
            )
        };
        lock(output).set_levels(levels);

        if !token.sleep(step_sleep) {
            return RampOutcome::Cancelled;
        }
    }

    RampOutcome::Completed
}
