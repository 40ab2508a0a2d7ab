//! Exponential backoff with jitter for device session retries (§4.4).
//! Generalized from the teacher's `JobQueue`/`JobStore` retry delay
//! (`2i64.pow(job.retry_count as u32).min(3600)`) into
//! `retry_delay * 2^attempt`, clamped, then jittered ±20%.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(5), max_delay: Duration::from_secs(3600) }
    }
}

/// The delay before retry number `attempt` (0-indexed), with ±20% jitter.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponential = policy.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
    let clamped = exponential.min(policy.max_delay.as_secs_f64());
    let jitter_fraction = rand::thread_rng().gen_range(-0.2..=0.2);
    let jittered = (clamped * (1.0 + jitter_fraction)).max(0.0);
    Duration::from_secs_f64(jittered)
}
