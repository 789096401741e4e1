use crate::error::ConfigError;
use std::time::Instant;

/// Continuous-refill token bucket (tokens per second) with fractional tokens.
///
/// The bucket starts full. Refill is computed lazily from the monotonic time
/// elapsed since the last refill, so no background timer is needed. Callers
/// sharing one bucket across threads wrap it in a mutex so that
/// [`take_token`](TokenBucket::take_token) runs as one critical section.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    /// `refill_per_sec == 0` is accepted: the bucket then holds a fixed quota
    /// that is never replenished once drained.
    pub fn new(capacity: f64, refill_per_sec: f64) -> Result<Self, ConfigError> {
        Self::starting_at(capacity, refill_per_sec, Instant::now())
    }

    pub(crate) fn starting_at(capacity: f64, refill_per_sec: f64, now: Instant) -> Result<Self, ConfigError> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        if !refill_per_sec.is_finite() || refill_per_sec < 0.0 {
            return Err(ConfigError::InvalidRefillRate(refill_per_sec));
        }
        Ok(Self { capacity, tokens: capacity, refill_per_sec, last: now })
    }

    pub fn refill(&mut self) {
        self.refill_at(Instant::now());
    }

    pub(crate) fn refill_at(&mut self, now: Instant) {
        // An instant older than `last` counts as zero elapsed time and leaves
        // `last` where it is.
        if now <= self.last { return; }
        let dt = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + dt * self.refill_per_sec).min(self.capacity);
        self.last = now;
    }

    /// Refill, then consume exactly one token if at least one is available.
    /// Returns false (leaving the bucket untouched) when the request must be
    /// denied.
    pub fn take_token(&mut self) -> bool {
        self.take_token_at(Instant::now())
    }

    pub(crate) fn take_token_at(&mut self, now: Instant) -> bool {
        self.refill_at(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Currently available tokens, refilled up to now.
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    pub fn capacity(&self) -> f64 { self.capacity }
    pub fn refill_per_sec(&self) -> f64 { self.refill_per_sec }

    #[cfg(test)]
    fn tokens(&self) -> f64 { self.tokens }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    const EPS: f64 = 1e-9;

    fn bucket(capacity: f64, rate: f64) -> (TokenBucket, Instant) {
        let t0 = Instant::now();
        (TokenBucket::starting_at(capacity, rate, t0).unwrap(), t0)
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert_eq!(TokenBucket::new(0.0, 1.0).unwrap_err(), ConfigError::InvalidCapacity(0.0));
        assert_eq!(TokenBucket::new(-3.0, 1.0).unwrap_err(), ConfigError::InvalidCapacity(-3.0));
        assert!(matches!(TokenBucket::new(f64::NAN, 1.0), Err(ConfigError::InvalidCapacity(_))));
        assert!(matches!(TokenBucket::new(f64::INFINITY, 1.0), Err(ConfigError::InvalidCapacity(_))));
        assert_eq!(TokenBucket::new(10.0, -0.5).unwrap_err(), ConfigError::InvalidRefillRate(-0.5));
        assert!(matches!(TokenBucket::new(10.0, f64::INFINITY), Err(ConfigError::InvalidRefillRate(_))));
    }

    #[test]
    fn starts_full() {
        let (b, _) = bucket(10.0, 3.0);
        assert_eq!(b.tokens(), 10.0);
        assert_eq!(b.capacity(), 10.0);
        assert_eq!(b.refill_per_sec(), 3.0);
    }

    #[test]
    fn burst_of_capacity_then_denied() {
        let (mut b, t0) = bucket(10.0, 3.0);
        for i in 0..10 {
            assert!(b.take_token_at(t0), "call {} should be admitted", i);
        }
        assert!(!b.take_token_at(t0));
        assert_eq!(b.tokens(), 0.0);
    }

    #[test]
    fn denied_call_leaves_tokens_unchanged() {
        let (mut b, t0) = bucket(2.0, 1.0);
        assert!(b.take_token_at(t0));
        assert!(b.take_token_at(t0));
        let t1 = t0 + Duration::from_millis(500);
        assert!(!b.take_token_at(t1));
        assert!((b.tokens() - 0.5).abs() < EPS);
    }

    #[test]
    fn refill_after_drain_is_time_proportional() {
        let (mut b, t0) = bucket(10.0, 3.0);
        for _ in 0..10 { b.take_token_at(t0); }
        b.refill_at(t0 + Duration::from_secs(2));
        assert!((b.tokens() - 6.0).abs() < EPS);
    }

    #[test]
    fn refill_saturates_at_capacity() {
        let (mut b, t0) = bucket(10.0, 3.0);
        for _ in 0..10 { b.take_token_at(t0); }
        b.refill_at(t0 + Duration::from_secs(3600));
        assert_eq!(b.tokens(), 10.0);
    }

    #[test]
    fn refill_is_idempotent_without_elapsed_time() {
        let (mut b, t0) = bucket(10.0, 3.0);
        b.take_token_at(t0);
        let t1 = t0 + Duration::from_millis(100);
        b.refill_at(t1);
        let once = b.tokens();
        b.refill_at(t1);
        assert_eq!(b.tokens(), once);
    }

    #[test]
    fn earlier_instant_does_not_rewind() {
        let (mut b, t0) = bucket(4.0, 1.0);
        for _ in 0..4 { b.take_token_at(t0); }
        let t2 = t0 + Duration::from_secs(2);
        b.refill_at(t2);
        b.refill_at(t0 + Duration::from_secs(1));
        assert!((b.tokens() - 2.0).abs() < EPS);
        assert_eq!(b.last, t2);
    }

    #[test]
    fn zero_refill_rate_is_a_fixed_quota() {
        let (mut b, t0) = bucket(3.0, 0.0);
        for _ in 0..3 { assert!(b.take_token_at(t0)); }
        assert!(!b.take_token_at(t0 + Duration::from_secs(86_400)));
    }

    #[test]
    fn reference_scenario_recovers_after_one_second() {
        let (mut b, t0) = bucket(10.0, 3.0);
        let admitted = (0..11).filter(|_| b.take_token_at(t0)).count();
        assert_eq!(admitted, 10);
        assert!(b.take_token_at(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn long_run_throughput_tracks_refill_rate() {
        let (mut b, t0) = bucket(10.0, 3.0);
        for _ in 0..10 { b.take_token_at(t0); }
        // Poll every 10 ms for 100 s from an empty bucket.
        let admitted = (1..=10_000u64)
            .filter(|i| b.take_token_at(t0 + Duration::from_millis(i * 10)))
            .count();
        assert!((299..=300).contains(&admitted), "admitted {}", admitted);
    }

    #[test]
    fn racing_callers_never_overdraw() {
        let shared = Arc::new(Mutex::new(TokenBucket::new(25.0, 0.0).unwrap()));
        let admitted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..64)
                .map(|_| {
                    let shared = shared.clone();
                    s.spawn(move || shared.lock().take_token() as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(admitted, 25);
        assert_eq!(shared.lock().tokens(), 0.0);
    }

    proptest! {
        #[test]
        fn tokens_stay_within_bounds(
            capacity in 0.5f64..50.0,
            rate in 0.0f64..20.0,
            steps in proptest::collection::vec((0u64..2_000, any::<bool>()), 1..200),
        ) {
            let (mut b, t0) = bucket(capacity, rate);
            let mut now = t0;
            for (dt_ms, take) in steps {
                now += Duration::from_millis(dt_ms);
                let before = b.tokens();
                if take {
                    let ok = b.take_token_at(now);
                    if !ok {
                        prop_assert!(b.tokens() < 1.0);
                    }
                } else {
                    b.refill_at(now);
                    prop_assert!(b.tokens() >= before);
                }
                prop_assert!(b.tokens() >= 0.0);
                prop_assert!(b.tokens() <= capacity);
            }
        }
    }
}
