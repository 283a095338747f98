//! Reconnect backoff
//!
//! `min(cap, base * 1.5^k)` with `k` drawn at random, so several bridges
//! restarting together do not retry in lockstep.

use rand::Rng;
use std::time::Duration;

/// Growth factor applied per exponent step
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Largest exponent drawn (inclusive)
pub const MAX_BACKOFF_EXPONENT: u32 = 4;

/// Delay for a given exponent, clamped to `cap`
pub fn backoff_delay(base: Duration, cap: Duration, exponent: u32) -> Duration {
    let scaled = base.as_secs_f64() * BACKOFF_FACTOR.powi(exponent as i32);
    if !scaled.is_finite() || scaled >= cap.as_secs_f64() {
        return cap;
    }
    Duration::from_secs_f64(scaled).min(cap)
}

/// Pick the next reconnect delay with a random exponent
pub fn next_reconnect_delay<R: Rng + ?Sized>(base: Duration, cap: Duration, rng: &mut R) -> Duration {
    let exponent = rng.gen_range(0..=MAX_BACKOFF_EXPONENT);
    backoff_delay(base, cap, exponent)
}
