use crate::config::RetryConfig;
use crate::mapper::EntryMapper;
use crate::traits::Sleeper;
use crate::types::{AggregatorError, ContentRepository, NewsItem, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fixed exponential schedule without jitter: one delay per attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    max_attempts: usize,
    initial_delay: Duration,
    multiplier: f64,
}

impl BackoffPolicy {
    pub fn new(max_attempts: usize, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.initial_delay, config.multiplier)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn exponential(&self) -> ExponentialBackoff<backoff::SystemClock> {
        ExponentialBackoff {
            current_interval: self.initial_delay,
            initial_interval: self.initial_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: Duration::from_secs(24 * 3600),
            max_elapsed_time: None,
            start_time: Instant::now(),
            ..Default::default()
        }
    }

    /// The delay slept after each failed attempt, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut backoff = self.exponential();
        (0..self.max_attempts)
            .map_while(|_| backoff.next_backoff())
            .collect()
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        self.schedule().get(attempt).copied()
    }

    pub fn total_wait(&self) -> Duration {
        self.schedule().iter().sum()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Re-fetches a single entry until the eventually consistent delivery API
/// returns something mappable.
pub struct RetryFetcher {
    content: Arc<dyn ContentRepository>,
    mapper: EntryMapper,
    policy: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryFetcher {
    pub fn new(
        content: Arc<dyn ContentRepository>,
        mapper: EntryMapper,
        policy: BackoffPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            content,
            mapper,
            policy,
            sleeper,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// A single attempt. Absent entries come back as `NotFound`.
    pub async fn fetch_once(&self, id: &str) -> Result<NewsItem> {
        let entry = self
            .content
            .fetch_by_id(id)
            .await
            .map_err(AggregatorError::TransientUpstream)?
            .ok_or_else(|| AggregatorError::NotFound { id: id.to_string() })?;
        self.mapper.map(&entry)
    }

    /// Try up to `max_attempts` times, sleeping the policy delay after every
    /// miss. Returns `None` once the schedule is exhausted.
    pub async fn fetch(&self, id: &str) -> Option<NewsItem> {
        let schedule = self.policy.schedule();
        let attempts = schedule.len();

        for (index, delay) in schedule.into_iter().enumerate() {
            match self.fetch_once(id).await {
                Ok(item) => {
                    info!("Fetched entry {} on attempt {}/{}", id, index + 1, attempts);
                    return Some(item);
                }
                Err(e) => {
                    debug!(
                        "Attempt {}/{} for entry {} missed ({}), retrying in {:?}",
                        index + 1,
                        attempts,
                        id,
                        e,
                        delay
                    );
                }
            }
            self.sleeper.sleep(delay).await;
        }

        warn!("Entry {} still unavailable after {} attempts", id, attempts);
        None
    }
}
