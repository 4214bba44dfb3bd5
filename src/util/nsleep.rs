use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sleep for an integer nanosecond budget.
///
/// Non-positive budgets return immediately. `spin_sleep` retries the
/// underlying OS sleep on spurious wakes and spins down the tail, so the
/// wake lands within a few microseconds of the budget.
pub fn nsleep(ns: i64) {
    if ns <= 0 {
        return;
    }
    spin_sleep::sleep(Duration::from_nanos(ns as u64));
}

/// Nanoseconds since the Unix epoch. All motion deadlines are in this
/// timebase.
pub fn now_ns() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_nsleep_duration() {
        let start = Instant::now();
        nsleep(20_000_000);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_millis(120));
    }

    #[test]
    fn test_nsleep_nonpositive() {
        let start = Instant::now();
        nsleep(0);
        nsleep(-1_000_000);
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_now_ns_monotonic_enough() {
        let a = now_ns();
        nsleep(1_000_000);
        let b = now_ns();
        assert!(a < b);
    }
}
