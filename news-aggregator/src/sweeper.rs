use crate::cache::NewsCache;
use crate::config::AggregatorConfig;
use crate::timestamp::render_flex;
use crate::traits::Clock;
use crate::types::{AggregatorError, ManagementEntry, ManagementRepository, Result, SourceError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Which step of purging an entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeStep {
    Unpublish,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurgeFailure {
    pub entry_id: String,
    pub step: PurgeStep,
    pub error: SourceError,
}

/// Summary of one sweep run.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
    pub matched: usize,
    pub purged: Vec<String>,
    pub failures: Vec<PurgeFailure>,
    pub cache_evicted: bool,
}

/// Periodically unpublishes and deletes expired entries from the authoring
/// API, then invalidates cached rankings.
pub struct ExpirySweeper {
    management: Arc<dyn ManagementRepository>,
    cache: Arc<NewsCache>,
    clock: Arc<dyn Clock>,
    content_type: String,
    expiration_field: String,
    locale: String,
    period: Duration,
}

impl ExpirySweeper {
    pub fn new(
        management: Arc<dyn ManagementRepository>,
        cache: Arc<NewsCache>,
        clock: Arc<dyn Clock>,
        config: &AggregatorConfig,
    ) -> Self {
        Self {
            management,
            cache,
            clock,
            content_type: config.primary_content_type.clone(),
            expiration_field: config.expiration_field.clone(),
            locale: config.locale.clone(),
            period: config.sweep_period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn expiry_filter(&self, now: DateTime<Utc>) -> HashMap<String, String> {
        HashMap::from([(
            format!("fields.{}[lte]", self.expiration_field),
            render_flex(now.fixed_offset()),
        )])
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        let run_id = Uuid::new_v4();
        let now = self.clock.now_utc();
        let filters = self.expiry_filter(now);
        info!(%run_id, "Starting expiry sweep for {} entries expired at {:?}", self.content_type, filters);

        let expired = self
            .management
            .query(&self.content_type, &filters)
            .await
            .map_err(AggregatorError::ManagementApi)?;

        let mut report = SweepReport {
            run_id,
            now,
            matched: expired.len(),
            purged: Vec::new(),
            failures: Vec::new(),
            cache_evicted: false,
        };

        if expired.is_empty() {
            info!(%run_id, "No expired entries found");
            return Ok(report);
        }

        for entry in &expired {
            match self.purge(entry).await {
                Ok(()) => report.purged.push(entry.id.clone()),
                Err(failure) => {
                    warn!(
                        %run_id,
                        entry_id = %failure.entry_id,
                        step = ?failure.step,
                        "Failed to purge expired entry: {}",
                        failure.error
                    );
                    report.failures.push(failure);
                }
            }
        }

        self.cache.evict_all().await;
        report.cache_evicted = true;

        info!(
            %run_id,
            matched = report.matched,
            purged = report.purged.len(),
            failed = report.failures.len(),
            "Expiry sweep finished"
        );
        Ok(report)
    }

    async fn purge(&self, entry: &ManagementEntry) -> std::result::Result<(), PurgeFailure> {
        let title = entry.str_field("title", &self.locale).unwrap_or_default();
        info!("Purging expired entry {} ({})", entry.id, title);

        let failure = |step, error| PurgeFailure {
            entry_id: entry.id.clone(),
            step,
            error,
        };

        let current = if entry.is_published() {
            self.management
                .unpublish(entry)
                .await
                .map_err(|e| failure(PurgeStep::Unpublish, e))?
        } else {
            entry.clone()
        };

        self.management
            .delete(&current)
            .await
            .map_err(|e| failure(PurgeStep::Delete, e))
    }

    /// Run forever on a fixed period. A run that overlaps the next tick delays
    /// it instead of running concurrently.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Expiry sweeper started (every {:?})", self.period);

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Expiry sweep aborted: {}", e);
                }
            }
        })
    }
}
