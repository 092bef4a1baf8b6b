use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Geometric backoff with jitter and a cap. `steps` bounds the number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: f64,
    /// Fraction of the computed delay added at random, in `[0, jitter)`.
    pub jitter: f64,
    pub cap: Duration,
    pub steps: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            factor: 1.5,
            jitter: 0.1,
            cap: Duration::from_secs(1),
            steps: 10,
        }
    }
}

impl Backoff {
    /// Defaults overridden by `RECONKIT_RETRY_STEPS`, `RECONKIT_RETRY_INITIAL_MS`, `RECONKIT_RETRY_CAP_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            steps: env_u64("RECONKIT_RETRY_STEPS").map(|v| v.clamp(1, u32::MAX as u64) as u32).unwrap_or(d.steps),
            initial: env_u64("RECONKIT_RETRY_INITIAL_MS").map(Duration::from_millis).unwrap_or(d.initial),
            cap: env_u64("RECONKIT_RETRY_CAP_MS").map(Duration::from_millis).unwrap_or(d.cap),
            ..d
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps.max(1);
        self
    }

    /// No sleeping between attempts; used by tests and tight loops.
    pub fn immediate(steps: u32) -> Self {
        Self { initial: Duration::ZERO, factor: 1.0, jitter: 0.0, cap: Duration::ZERO, steps: steps.max(1) }
    }

    /// Delay without jitter before the retry that follows `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial.as_secs_f64() * self.factor.max(1.0).powi(exp);
        let capped = secs.min(self.cap.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        base.mul_f64(1.0 + extra)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_geometrically_until_cap() {
        let b = Backoff { initial: Duration::from_millis(100), factor: 2.0, jitter: 0.0, cap: Duration::from_millis(500), steps: 10 };
        assert_eq!(b.base_delay(1), Duration::from_millis(100));
        assert_eq!(b.base_delay(2), Duration::from_millis(200));
        assert_eq!(b.base_delay(3), Duration::from_millis(400));
        assert_eq!(b.base_delay(4), Duration::from_millis(500));
        assert_eq!(b.base_delay(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let b = Backoff { initial: Duration::from_millis(100), factor: 1.0, jitter: 0.5, cap: Duration::from_secs(1), steps: 3 };
        for _ in 0..50 {
            let d = b.delay(1);
            assert!(d >= Duration::from_millis(100) && d < Duration::from_millis(150), "delay {:?}", d);
        }
    }

    #[test]
    fn env_overrides_defaults() {
        const KEYS: [&str; 3] = ["RECONKIT_RETRY_STEPS", "RECONKIT_RETRY_INITIAL_MS", "RECONKIT_RETRY_CAP_MS"];
        for k in KEYS {
            std::env::remove_var(k);
        }
        assert_eq!(Backoff::from_env(), Backoff::default());

        std::env::set_var("RECONKIT_RETRY_STEPS", "4");
        std::env::set_var("RECONKIT_RETRY_INITIAL_MS", "25");
        std::env::set_var("RECONKIT_RETRY_CAP_MS", "200");
        let b = Backoff::from_env();
        assert_eq!(b.steps, 4);
        assert_eq!(b.initial, Duration::from_millis(25));
        assert_eq!(b.cap, Duration::from_millis(200));
        assert_eq!(b.factor, Backoff::default().factor);

        std::env::set_var("RECONKIT_RETRY_STEPS", "0");
        std::env::set_var("RECONKIT_RETRY_INITIAL_MS", "soon");
        std::env::set_var("RECONKIT_RETRY_CAP_MS", "-1");
        let b = Backoff::from_env();
        assert_eq!(b.steps, 1);
        assert_eq!(b.initial, Backoff::default().initial);
        assert_eq!(b.cap, Backoff::default().cap);

        for k in KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn immediate_never_sleeps() {
        let b = Backoff::immediate(0);
        assert_eq!(b.steps, 1);
        assert_eq!(b.delay(5), Duration::ZERO);
    }
}
