//! Retry policies and delay calculation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{retry, workers};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,
    /// `delay * multiplier^retries`, capped and jittered
    Exponential { multiplier: u32, max_delay: Duration },
}

/// Per-task retry declaration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff: Backoff::Exponential {
                multiplier: 2,
                max_delay: retry::MAX_DELAY,
            },
        }
    }

    /// Delay before the retry following `retries` earlier retries
    pub fn delay_for(&self, retries: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential {
                multiplier,
                max_delay,
            } => {
                let base = BackoffCalculator::calculate_retry_delay(
                    retries, self.delay, max_delay, multiplier,
                );
                BackoffCalculator::with_jitter(base, retry::JITTER_FACTOR)
            }
        }
    }
}

/// Delay arithmetic shared by the queue and the workers
pub struct BackoffCalculator;

impl BackoffCalculator {
    /// Idle backoff for a worker that keeps finding nothing to run
    pub fn calculate_idle_duration(consecutive_empty_polls: u32, base: Duration) -> Duration {
        let exponent = consecutive_empty_polls.min(workers::MAX_BACKOFF_MULTIPLIER);
        let base_millis = base.as_millis() as u64;
        let sleep = base_millis.saturating_mul(1u64 << exponent);
        let capped = sleep.min(workers::MAX_IDLE_SLEEP_MS);
        Self::with_jitter(Duration::from_millis(capped), retry::JITTER_FACTOR)
    }

    /// Exponential retry delay, capped
    pub fn calculate_retry_delay(
        retry_count: u32,
        base_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Duration {
        let delay_millis = base_delay.as_millis() as u64;
        let factor = (multiplier as u64).saturating_pow(retry_count);
        let multiplied = delay_millis.saturating_mul(factor);
        Duration::from_millis(multiplied.min(max_delay.as_millis() as u64))
    }

    /// Spread a delay by up to `jitter_percentage` either way
    pub fn with_jitter(delay: Duration, jitter_percentage: f64) -> Duration {
        let millis = delay.as_millis() as u64;
        let range = (millis as f64 * jitter_percentage) as u64;
        if range == 0 {
            return delay;
        }
        let offset = fastrand::u64(0..=range * 2);
        Duration::from_millis((millis + offset).saturating_sub(range))
    }
}
