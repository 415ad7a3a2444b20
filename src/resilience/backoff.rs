//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Uncapped exponential delay: `initial_ms * multiplier^attempt`, then capped at `max_ms`.
pub fn exponential_delay(attempt: u32, initial_ms: u64, multiplier: f64, max_ms: u64) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = initial_ms as f64 * multiplier.powi(exponent);
    let capped = if raw.is_finite() {
        raw.min(max_ms as f64)
    } else {
        max_ms as f64
    };
    Duration::from_millis(capped.round() as u64)
}

/// Randomize a delay within its own bound.
///
/// Keeps the upper half fixed and randomizes the lower half, so callers that
/// failed together spread out without ever waiting longer than `delay`.
pub fn jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    let half = ms / 2;
    let spread = ms - half;
    let offset = if spread > 0 {
        rand::thread_rng().gen_range(0..=spread)
    } else {
        0
    };
    Duration::from_millis(half + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(exponential_delay(0, 100, 2.0, 1000), Duration::from_millis(100));
        assert_eq!(exponential_delay(1, 100, 2.0, 1000), Duration::from_millis(200));
        assert_eq!(exponential_delay(2, 100, 2.0, 1000), Duration::from_millis(400));
        assert_eq!(exponential_delay(3, 100, 2.0, 1000), Duration::from_millis(800));
        assert_eq!(exponential_delay(4, 100, 2.0, 1000), Duration::from_millis(1000));
        assert_eq!(exponential_delay(200, 100, 2.0, 1000), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        for _ in 0..100 {
            let d = jitter(Duration::from_millis(400));
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(400));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}
