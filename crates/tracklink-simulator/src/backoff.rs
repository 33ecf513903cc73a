use rand::Rng;
use std::time::Duration;

/// Capped exponential reconnect delay with ±10% jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, before jitter.
    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        self.attempts += 1;

        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        base.mul_f64(factor)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within_jitter(actual: Duration, base_ms: u64) -> bool {
        let ms = actual.as_secs_f64() * 1000.0;
        let base = base_ms as f64;
        ms >= base * 0.9 - 1.0 && ms <= base * 1.1 + 1.0
    }

    #[test]
    fn test_doubles_until_cap() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let expected = [100, 200, 400, 500, 500];
        for base in expected {
            let d = b.next_delay();
            assert!(within_jitter(d, base), "{d:?} not near {base}ms");
        }
        assert_eq!(b.attempts(), 5);
    }

    #[test]
    fn test_reset() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        b.next_delay();
        b.next_delay();
        assert_eq!(b.peek(), Duration::from_secs(4));
        b.reset();
        assert_eq!(b.peek(), Duration::from_secs(1));
        assert_eq!(b.attempts(), 0);
    }

    #[test]
    fn test_max_below_initial_is_raised() {
        let mut b = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));
        b.next_delay();
        assert_eq!(b.peek(), Duration::from_secs(2));
    }
}
