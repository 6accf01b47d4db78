//! Duty-cycle arithmetic and the busy loop
//!
//! The busy loop must not be removable by the optimizer: if it were, a
//! worker would sleep through its "busy" time and the host would show
//! near-zero load with no error anywhere. Each iteration therefore consumes
//! the previous iteration's output, and the final state is handed back to
//! the caller and carried into the next window.

use std::time::{Duration, Instant};

use crate::domain::Percent;

/// Iterations between clock checks; small enough to stop within a few µs
/// of the busy deadline.
const SPIN_BATCH: u32 = 1_024;

/// Non-zero seed for the spin state (xorshift never leaves zero)
pub const SPIN_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Busy/idle split of one duty window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyPlan {
    pub busy: Duration,
    pub idle: Duration,
}

impl DutyPlan {
    /// Split `window` according to `target`
    #[must_use]
    pub fn for_target(window: Duration, target: Percent) -> Self {
        let busy = window.mul_f64(target.as_fraction()).min(window);
        Self { busy, idle: window - busy }
    }
}

/// One step of the spin computation (xorshift64*)
#[inline]
#[must_use]
pub fn mix(mut state: u64) -> u64 {
    state ^= state >> 12;
    state ^= state << 25;
    state ^= state >> 27;
    state.wrapping_mul(0x2545_F491_4F6C_DD1D)
}

/// Burn CPU from `window_start` until `busy` has elapsed
///
/// Returns the advanced spin state; callers must feed it into the next call.
#[must_use]
pub fn spin_until(window_start: Instant, busy: Duration, mut state: u64) -> u64 {
    loop {
        for _ in 0..SPIN_BATCH {
            state = mix(state);
        }
        if window_start.elapsed() >= busy {
            return state;
        }
    }
}
