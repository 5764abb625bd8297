use rand::Rng;
use std::time::Duration;

/// Decides how long the daemon waits before the next queue flush.
///
/// A flush that empties the queue returns to the idle cadence. One that leaves
/// work behind retries sooner, doubling from `base` toward the idle interval
/// with jitter in the upper half of each step.
#[derive(Debug, Clone)]
pub struct RetryPacer {
    idle: Duration,
    base: Duration,
    failures: u32,
}

impl RetryPacer {
    pub fn new(idle: Duration, base: Duration) -> Self {
        Self {
            idle,
            base: base.min(idle),
            failures: 0,
        }
    }

    /// Records the queue length left by a flush and returns the next wait.
    pub fn after_flush(&mut self, pending: usize) -> Duration {
        self.after_flush_with_rng(pending, &mut rand::thread_rng())
    }

    pub fn after_flush_with_rng<R: Rng + ?Sized>(&mut self, pending: usize, rng: &mut R) -> Duration {
        if pending == 0 {
            self.reset();
            return self.idle;
        }
        let step = self.step();
        self.failures = self.failures.saturating_add(1);
        Duration::from_millis(rng.gen_range(step / 2..=step))
    }

    /// Un-jittered ceiling for the current failure count, in milliseconds.
    fn step(&self) -> u64 {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let idle_ms = u64::try_from(self.idle.as_millis()).unwrap_or(u64::MAX);
        base_ms
            .saturating_mul(1u64 << self.failures.min(16))
            .min(idle_ms)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn steps_double_up_to_idle() {
        let mut pacer = RetryPacer::new(Duration::from_secs(30), Duration::from_secs(1));
        let mut steps = Vec::new();
        for _ in 0..7 {
            steps.push(pacer.step() / 1000);
            pacer.after_flush(1);
        }
        assert_eq!(steps, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn jittered_wait_stays_in_upper_half_of_step() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..32 {
            let mut pacer = RetryPacer::new(Duration::from_millis(800), Duration::from_millis(100));
            for _ in 0..3 {
                pacer.after_flush_with_rng(1, &mut rng);
            }
            let wait = pacer.after_flush_with_rng(1, &mut rng);
            assert!(wait >= Duration::from_millis(400));
            assert!(wait <= Duration::from_millis(800));
        }
    }

    #[test]
    fn pacer_returns_to_idle_once_queue_is_empty() {
        let idle = Duration::from_secs(30);
        let mut pacer = RetryPacer::new(idle, Duration::from_secs(1));

        let first = pacer.after_flush(2);
        assert!(first <= Duration::from_secs(1));
        pacer.after_flush(2);
        assert_eq!(pacer.failures(), 2);

        assert_eq!(pacer.after_flush(0), idle);
        assert_eq!(pacer.failures(), 0);
    }

    #[test]
    fn pacer_never_waits_longer_than_idle() {
        let idle = Duration::from_secs(5);
        let mut pacer = RetryPacer::new(idle, Duration::from_secs(10));
        for _ in 0..20 {
            assert!(pacer.after_flush(1) <= idle);
        }
    }
}
