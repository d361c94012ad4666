pub mod types;
pub mod config;
pub mod traits;
pub mod timestamp;
pub mod mapper;
pub mod ranking;
pub mod cache;
pub mod retry;
pub mod notifier;
pub mod webhook;
pub mod sweeper;
pub mod aggregator;
pub mod sources;

pub use types::*;
pub use config::{AggregatorConfig, RetryConfig};
pub use traits::{Clock, FixedClock, RecordingSleeper, Sleeper, SystemClock, TokioSleeper};
pub use mapper::EntryMapper;
pub use ranking::RankingEngine;
pub use cache::{NewsCache, RankedList};
pub use retry::{BackoffPolicy, RetryFetcher};
pub use notifier::{EventKind, EventNotifier, NewsEvent};
pub use webhook::{ChangeKind, ChangeNotification, ChangeOutcome};
pub use sweeper::{ExpirySweeper, PurgeFailure, PurgeStep, SweepReport};
pub use aggregator::{NewsAggregator, NewsResponse};
