use crate::cache::{NewsCache, RankedList};
use crate::config::AggregatorConfig;
use crate::mapper::EntryMapper;
use crate::notifier::EventNotifier;
use crate::ranking::RankingEngine;
use crate::retry::{BackoffPolicy, RetryFetcher};
use crate::sweeper::ExpirySweeper;
use crate::traits::{Clock, Sleeper};
use crate::types::{
    AggregatorError, Audience, ContentRepository, EventSink, ManagementRepository, NewsItem, Result,
};
use crate::webhook::{ChangeKind, ChangeNotification, ChangeOutcome};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the read boundary hands back for an audience.
#[derive(Debug, Clone, PartialEq)]
pub enum NewsResponse {
    Items(RankedList),
    NoContent,
}

/// Owns the ranking, cache, retry and notification services and wires the
/// read path and the change-notification path together.
pub struct NewsAggregator {
    ranking: RankingEngine,
    cache: Arc<NewsCache>,
    fetcher: RetryFetcher,
    notifier: EventNotifier,
    clock: Arc<dyn Clock>,
    config: AggregatorConfig,
}

impl NewsAggregator {
    pub fn new(
        config: AggregatorConfig,
        content: Arc<dyn ContentRepository>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        config.validate()?;
        let mapper = EntryMapper::new(config.reference_tz()?);

        let ranking = RankingEngine::new(content.clone(), mapper, clock.clone(), &config);
        let fetcher = RetryFetcher::new(content, mapper, BackoffPolicy::from_config(&config.retry), sleeper);
        let notifier = EventNotifier::new(sink, config.event_topic.clone());

        info!(
            "News aggregator ready (capacity {}, primary '{}', extras '{}', zone {})",
            config.capacity,
            config.primary_content_type,
            config.extras_content_type,
            config.reference_timezone
        );

        Ok(Self {
            ranking,
            cache: Arc::new(NewsCache::new()),
            fetcher,
            notifier,
            clock,
            config,
        })
    }

    pub fn cache(&self) -> Arc<NewsCache> {
        self.cache.clone()
    }

    /// Sweeper sharing this aggregator's cache and clock.
    pub fn expiry_sweeper(&self, management: Arc<dyn ManagementRepository>) -> ExpirySweeper {
        ExpirySweeper::new(management, self.cache.clone(), self.clock.clone(), &self.config)
    }

    /// The ranked list for `audience`, served from cache when present.
    pub async fn build_final_news(&self, audience: Audience) -> Result<RankedList> {
        self.cache
            .compute_if_absent(audience, || self.ranking.rank(audience))
            .await
    }

    pub async fn news_for(&self, audience: Audience) -> Result<NewsResponse> {
        let items = self.build_final_news(audience).await?;
        if items.is_empty() {
            info!("No news available for {}", audience);
            return Ok(NewsResponse::NoContent);
        }
        Ok(NewsResponse::Items(items))
    }

    /// Single lookup without retries. Any failure reads as "not available".
    pub async fn get_news_by_id(&self, id: &str) -> Option<NewsItem> {
        match self.fetcher.fetch_once(id).await {
            Ok(item) => Some(item),
            Err(AggregatorError::NotFound { .. }) => {
                debug!("Entry {} not visible in delivery API", id);
                None
            }
            Err(e) => {
                error!("Failed to fetch entry {}: {}", id, e);
                None
            }
        }
    }

    pub async fn evict_news_cache(&self) {
        self.cache.evict_all().await;
    }

    pub async fn handle_change(&self, notification: &ChangeNotification) -> Result<ChangeOutcome> {
        info!("Change notification received: topic={}", notification.topic);
        debug!("Change payload: {:?}", notification.payload);

        if notification.invalidates_cache() {
            self.cache.evict_all().await;
        }

        let kind = notification.kind();
        let outcome = match kind {
            ChangeKind::Publish | ChangeKind::Unpublish => match notification.entry_id() {
                None => {
                    warn!("No entry id in {} payload", notification.topic);
                    ChangeOutcome::MissingEntryId
                }
                Some(id) => {
                    let resolved = self.fetcher.fetch(id).await;
                    if kind == ChangeKind::Publish {
                        match resolved {
                            Some(item) => {
                                self.notifier.notify_upsert(&item).await?;
                                ChangeOutcome::Upserted { id: id.to_string() }
                            }
                            None => ChangeOutcome::NotPropagated { id: id.to_string() },
                        }
                    } else {
                        self.notifier.notify_removed(resolved.as_ref(), id).await?;
                        ChangeOutcome::Removed {
                            id: id.to_string(),
                            resolved: resolved.is_some(),
                        }
                    }
                }
            },
            ChangeKind::OtherEntry | ChangeKind::Unrelated => {
                info!("No action for topic {}", notification.topic);
                ChangeOutcome::Ignored
            }
        };

        debug!("Change notification processed: {:?}", outcome);
        Ok(outcome)
    }

    pub async fn send_raw(&self, message: &str) -> Result<()> {
        self.notifier.send_raw(message).await
    }
}
