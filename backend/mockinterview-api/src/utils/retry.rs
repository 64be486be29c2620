use std::time::Duration;

/// Backoff schedule for bounded retry loops.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// Session-token collisions: three attempts, short pauses.
    pub fn token_collision() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_millis(200),
            jitter_max: Some(Duration::from_millis(25)),
        }
    }

    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter_max: None,
        }
    }

    /// Delay to wait after the given failed attempt (1-based), before jitter.
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let backoff = self.base_backoff.saturating_mul(1u32 << exponent);
        std::cmp::min(backoff, self.max_backoff)
    }

    /// Sleeps for the backoff of the given failed attempt plus random jitter.
    pub async fn pause_after(&self, attempt: usize) {
        let mut wait = self.backoff_for(attempt);
        if let Some(jitter_max) = self.jitter_max {
            let jitter_ms = jitter_max.as_millis() as u64;
            if jitter_ms > 0 {
                wait += Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1));
            }
        }
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
