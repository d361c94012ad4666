// Use the interfaces crate for core types
pub use interfaces::defs::{
    Audience, ContentRepository, EventSink, ManagementEntry, ManagementRepository, NewsItem,
    RawEntry, SourceError,
};

use std::time::Duration;

/// HTTP settings shared by the delivery, management and event bridge clients.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub page_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "News-Aggregator/1.0".to_string(),
            timeout_seconds: 30,
            page_size: 100,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Entry not found: {id}")]
    NotFound { id: String },

    #[error("Upstream unavailable: {0}")]
    TransientUpstream(#[source] SourceError),

    #[error("Malformed {field} on entry {entry_id}: '{value}' ({reason})")]
    MalformedData {
        entry_id: String,
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Management API failure: {0}")]
    ManagementApi(#[source] SourceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
