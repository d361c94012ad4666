use crate::types::{AggregatorError, FetchConfig, Result};
use chrono_tz::Tz;
use std::time::Duration;

pub const DEFAULT_DELIVERY_URL: &str = "https://cdn.contentful.com";
pub const DEFAULT_MANAGEMENT_URL: &str = "https://api.contentful.com";

/// Retry schedule for re-fetching an entry after a change notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(300),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub space_id: String,
    pub environment: String,
    pub delivery_token: String,
    pub management_token: String,
    pub delivery_url: String,
    pub management_url: String,
    pub locale: String,

    pub primary_content_type: String,
    pub extras_content_type: String,
    pub expiration_field: String,

    /// Maximum number of items in a ranked result.
    pub capacity: usize,
    /// Page size used when pulling the extras pool.
    pub extras_limit: usize,
    pub reference_timezone: String,

    pub sweep_period: Duration,
    pub retry: RetryConfig,

    pub event_topic: String,
    pub event_bridge_url: Option<String>,

    pub fetch: FetchConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            space_id: String::new(),
            environment: "master".to_string(),
            delivery_token: String::new(),
            management_token: String::new(),
            delivery_url: DEFAULT_DELIVERY_URL.to_string(),
            management_url: DEFAULT_MANAGEMENT_URL.to_string(),
            locale: "en-US".to_string(),
            primary_content_type: "news".to_string(),
            extras_content_type: "novedadesFijas".to_string(),
            expiration_field: "expiration_date".to_string(),
            capacity: 8,
            extras_limit: 8,
            reference_timezone: "America/Argentina/Buenos_Aires".to_string(),
            sweep_period: Duration::from_secs(60),
            retry: RetryConfig::default(),
            event_topic: "websocket".to_string(),
            event_bridge_url: None,
            fetch: FetchConfig::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn reference_tz(&self) -> Result<Tz> {
        self.reference_timezone.parse::<Tz>().map_err(|e| {
            AggregatorError::Config(format!(
                "unknown reference timezone '{}': {}",
                self.reference_timezone, e
            ))
        })
    }

    /// Checks that only matter once we talk to the real upstream APIs.
    pub fn validate_remote(&self) -> Result<()> {
        if self.space_id.trim().is_empty() {
            return Err(AggregatorError::Config("space id must not be empty".to_string()));
        }
        if self.delivery_token.trim().is_empty() {
            return Err(AggregatorError::Config("delivery token must not be empty".to_string()));
        }
        if self.management_token.trim().is_empty() {
            return Err(AggregatorError::Config("management token must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(AggregatorError::Config("capacity must be at least 1".to_string()));
        }
        if self.sweep_period.is_zero() {
            return Err(AggregatorError::Config("sweep period must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(AggregatorError::Config("retry attempts must be at least 1".to_string()));
        }
        if self.primary_content_type.is_empty() || self.extras_content_type.is_empty() {
            return Err(AggregatorError::Config("content types must not be empty".to_string()));
        }
        self.reference_tz()?;
        Ok(())
    }
}
