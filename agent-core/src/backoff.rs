use rand::Rng;
use std::time::Duration;

/// Decorrelated-ish exponential backoff: `uniform(0, min(cap, base *
/// 2^attempt))`, matching `original_source/watcher.py`'s `Backoff` class.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: f64,
    cap: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_secs: f64, cap_secs: f64) -> Self {
        Self {
            base: base_secs,
            cap: cap_secs,
            attempt: 0,
        }
    }

    /// Advance the attempt counter and return the next sleep duration.
    pub fn next_sleep(&mut self) -> Duration {
        self.attempt += 1;
        let upper = (self.base * 2f64.powi(self.attempt as i32)).min(self.cap);
        let secs = rand::thread_rng().gen_range(0.0..=upper.max(0.0));
        Duration::from_secs_f64(secs)
    }

    /// Reset the attempt counter after a successful operation.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(1.0, 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_upper_bound_saturates_at_cap() {
        let mut b = Backoff::new(1.0, 60.0);
        for _ in 0..10 {
            let d = b.next_sleep();
            assert!(d.as_secs_f64() <= 60.0);
        }
    }

    #[test]
    fn reset_restarts_growth() {
        let mut b = Backoff::new(1.0, 60.0);
        for _ in 0..5 {
            b.next_sleep();
        }
        b.reset();
        assert_eq!(b.attempt, 0);
    }

    #[test]
    fn first_sleep_is_bounded_by_base_times_two() {
        let mut b = Backoff::new(1.0, 60.0);
        let d = b.next_sleep();
        assert!(d.as_secs_f64() <= 2.0);
    }
}
