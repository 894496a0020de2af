#![forbid(unsafe_code)]

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with full jitter, doubling `base_ms` per attempt and
/// capping at `max_ms`.
pub fn exponential_with_jitter(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let pow = if attempt >= 64 {
        0
    } else {
        1u64.checked_shl(attempt.min(16)).unwrap_or(0)
    };
    let raw = base_ms.saturating_mul(pow.max(1));
    let capped = raw.min(max_ms);
    let jitter = rand::thread_rng().gen_range(0..(capped / 2).max(1));
    Duration::from_millis(capped / 2 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_the_cap() {
        for attempt in 0..20 {
            let d = exponential_with_jitter(attempt, 100, 5_000);
            assert!(d.as_millis() <= 5_000);
        }
    }

    #[test]
    fn backoff_grows_with_attempt_number() {
        let early = exponential_with_jitter(1, 100, 60_000).as_millis();
        let late = exponential_with_jitter(8, 100, 60_000).as_millis();
        assert!(late >= early);
    }
}
