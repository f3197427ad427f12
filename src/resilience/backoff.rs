//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Calculate exponential backoff delay with jitter.
///
/// Used between CAS attempts that lost a version race and between store
/// writes that failed to reach the backend. Jitter spreads workers that
/// collided on the same record.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 50% of the delay)
    let jitter_range = capped_delay / 2;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(0, 5, 50), Duration::ZERO);

        let b1 = calculate_backoff(1, 5, 50);
        assert!(b1.as_millis() >= 5 && b1.as_millis() < 8);

        let b3 = calculate_backoff(3, 5, 50);
        assert!(b3.as_millis() >= 20);

        let max = calculate_backoff(10, 5, 50);
        assert!(max.as_millis() >= 50 && max.as_millis() < 75);
    }
}
