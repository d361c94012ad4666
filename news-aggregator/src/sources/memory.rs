//! In-process stand-ins for the upstream APIs, used by tests and `--demo` runs.

use crate::notifier::NewsEvent;
use crate::timestamp::parse_flex;
use crate::types::{
    ContentRepository, EventSink, ManagementEntry, ManagementRepository, RawEntry, SourceError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct ContentState {
    entries: Vec<(String, RawEntry)>,
    lag: HashMap<String, usize>,
    transient: HashMap<String, usize>,
    by_id_calls: HashMap<String, usize>,
    fetch_all_calls: usize,
    failure: Option<SourceError>,
}

/// Delivery API backed by a vector. Supports simulated replication lag per
/// entry and injected failures.
#[derive(Default)]
pub struct InMemoryContentRepository {
    state: RwLock<ContentState>,
}

impl InMemoryContentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace (by id) an entry of `content_type`.
    pub async fn insert(&self, content_type: &str, entry: RawEntry) {
        let mut state = self.state.write().await;
        match state.entries.iter_mut().find(|(_, e)| e.id == entry.id) {
            Some(slot) => *slot = (content_type.to_string(), entry),
            None => state.entries.push((content_type.to_string(), entry)),
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|(_, e)| e.id != id);
        state.entries.len() != before
    }

    /// The next `misses` lookups of `id` report it as absent.
    pub async fn set_replication_lag(&self, id: &str, misses: usize) {
        self.state.write().await.lag.insert(id.to_string(), misses);
    }

    /// The next `failures` lookups of `id` fail with a transport error.
    pub async fn set_transient_failures(&self, id: &str, failures: usize) {
        self.state.write().await.transient.insert(id.to_string(), failures);
    }

    /// Every subsequent call fails with `failure` until cleared with `None`.
    pub async fn set_failure(&self, failure: Option<SourceError>) {
        self.state.write().await.failure = failure;
    }

    pub async fn fetch_by_id_calls(&self, id: &str) -> usize {
        self.state.read().await.by_id_calls.get(id).copied().unwrap_or(0)
    }

    pub async fn fetch_all_calls(&self) -> usize {
        self.state.read().await.fetch_all_calls
    }
}

#[async_trait]
impl ContentRepository for InMemoryContentRepository {
    async fn fetch_all(&self, content_type: &str, limit: Option<usize>) -> Result<Vec<RawEntry>, SourceError> {
        let mut state = self.state.write().await;
        state.fetch_all_calls += 1;
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }

        Ok(state
            .entries
            .iter()
            .filter(|(kind, _)| kind == content_type)
            .map(|(_, entry)| entry.clone())
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<RawEntry>, SourceError> {
        let mut state = self.state.write().await;
        *state.by_id_calls.entry(id.to_string()).or_insert(0) += 1;
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }

        if let Some(remaining) = state.transient.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SourceError::Transport(format!("connection reset while fetching {}", id)));
            }
        }

        if let Some(remaining) = state.lag.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!("Simulating replication lag for {} ({} misses left)", id, remaining);
                return Ok(None);
            }
        }

        Ok(state
            .entries
            .iter()
            .find(|(_, entry)| entry.id == id)
            .map(|(_, entry)| entry.clone()))
    }
}

/// A call observed by [`InMemoryManagementRepository`].
#[derive(Debug, Clone, PartialEq)]
pub enum ManagementCall {
    Query {
        content_type: String,
        filters: HashMap<String, String>,
    },
    Unpublish {
        id: String,
        version: u64,
    },
    Delete {
        id: String,
        version: u64,
    },
}

#[derive(Default)]
struct ManagementState {
    entries: Vec<(String, ManagementEntry)>,
    failing_unpublish: HashSet<String>,
    failing_delete: HashSet<String>,
    query_failure: Option<SourceError>,
    calls: Vec<ManagementCall>,
}

/// Authoring API backed by a vector. Enforces the version checks the real API
/// performs on unpublish and delete.
pub struct InMemoryManagementRepository {
    locale: String,
    state: RwLock<ManagementState>,
}

impl Default for InMemoryManagementRepository {
    fn default() -> Self {
        Self::new("en-US")
    }
}

impl InMemoryManagementRepository {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            state: RwLock::new(ManagementState::default()),
        }
    }

    pub async fn insert(&self, content_type: &str, entry: ManagementEntry) {
        self.state
            .write()
            .await
            .entries
            .push((content_type.to_string(), entry));
    }

    pub async fn fail_unpublish_for(&self, id: &str) {
        self.state.write().await.failing_unpublish.insert(id.to_string());
    }

    pub async fn fail_delete_for(&self, id: &str) {
        self.state.write().await.failing_delete.insert(id.to_string());
    }

    pub async fn set_query_failure(&self, failure: Option<SourceError>) {
        self.state.write().await.query_failure = failure;
    }

    pub async fn calls(&self) -> Vec<ManagementCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn entry_ids(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .map(|(_, entry)| entry.id.clone())
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<ManagementEntry> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .find(|(_, entry)| entry.id == id)
            .map(|(_, entry)| entry.clone())
    }

    fn matches(&self, entry: &ManagementEntry, filters: &HashMap<String, String>) -> Result<bool, SourceError> {
        for (key, expected) in filters {
            let matched = if key == "sys.id" {
                entry.id == *expected
            } else if let Some(field) = key
                .strip_prefix("fields.")
                .and_then(|rest| rest.strip_suffix("[lte]"))
            {
                let bound = parse_flex(expected)
                    .map_err(|e| SourceError::Status { status: 400, body: e.to_string() })?;
                entry
                    .str_field(field, &self.locale)
                    .and_then(|raw| parse_flex(raw).ok())
                    .map(|value| value.with_timezone(&Utc) <= bound.with_timezone(&Utc))
                    .unwrap_or(false)
            } else if let Some(field) = key.strip_prefix("fields.") {
                entry.str_field(field, &self.locale) == Some(expected.as_str())
            } else {
                return Err(SourceError::Status {
                    status: 400,
                    body: format!("unsupported filter '{}'", key),
                });
            };

            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn version_conflict(id: &str, expected: u64, actual: u64) -> SourceError {
    SourceError::Status {
        status: 409,
        body: format!("version mismatch for {}: sent {}, current {}", id, expected, actual),
    }
}

#[async_trait]
impl ManagementRepository for InMemoryManagementRepository {
    async fn query(
        &self,
        content_type: &str,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<ManagementEntry>, SourceError> {
        let mut state = self.state.write().await;
        state.calls.push(ManagementCall::Query {
            content_type: content_type.to_string(),
            filters: filters.clone(),
        });
        if let Some(failure) = &state.query_failure {
            return Err(failure.clone());
        }

        let mut found = Vec::new();
        for (kind, entry) in &state.entries {
            if kind == content_type && self.matches(entry, filters)? {
                found.push(entry.clone());
            }
        }
        Ok(found)
    }

    async fn unpublish(&self, entry: &ManagementEntry) -> Result<ManagementEntry, SourceError> {
        let mut state = self.state.write().await;
        state.calls.push(ManagementCall::Unpublish {
            id: entry.id.clone(),
            version: entry.version,
        });
        if state.failing_unpublish.contains(&entry.id) {
            return Err(SourceError::Transport(format!("unpublish of {} refused", entry.id)));
        }

        let stored = state
            .entries
            .iter_mut()
            .map(|(_, stored)| stored)
            .find(|stored| stored.id == entry.id)
            .ok_or_else(|| SourceError::NotFound { id: entry.id.clone() })?;
        if stored.version != entry.version {
            return Err(version_conflict(&entry.id, entry.version, stored.version));
        }

        stored.published_version = None;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete(&self, entry: &ManagementEntry) -> Result<(), SourceError> {
        let mut state = self.state.write().await;
        state.calls.push(ManagementCall::Delete {
            id: entry.id.clone(),
            version: entry.version,
        });
        if state.failing_delete.contains(&entry.id) {
            return Err(SourceError::Transport(format!("delete of {} refused", entry.id)));
        }

        let position = state
            .entries
            .iter()
            .position(|(_, stored)| stored.id == entry.id)
            .ok_or_else(|| SourceError::NotFound { id: entry.id.clone() })?;
        let stored = &state.entries[position].1;
        if stored.version != entry.version {
            return Err(version_conflict(&entry.id, entry.version, stored.version));
        }
        if stored.is_published() {
            return Err(SourceError::Status {
                status: 400,
                body: format!("entry {} is still published", entry.id),
            });
        }

        state.entries.remove(position);
        Ok(())
    }
}

/// Event sink that keeps every published message in memory.
#[derive(Default)]
pub struct RecordingEventSink {
    messages: RwLock<Vec<(String, String)>>,
    attempts: AtomicUsize,
    failing: bool,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every message (attempts are still counted).
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// `(topic, payload)` pairs in publish order.
    pub async fn messages(&self) -> Vec<(String, String)> {
        self.messages.read().await.clone()
    }

    /// Payloads decoded as news events; anything else is skipped.
    pub async fn events(&self) -> Vec<NewsEvent> {
        self.messages
            .read()
            .await
            .iter()
            .filter_map(|(_, payload)| serde_json::from_str(payload).ok())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SourceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(SourceError::Transport("event bus unavailable".to_string()));
        }
        self.messages.write().await.push((topic.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lte_filter_compares_instants() {
        let repo = InMemoryManagementRepository::default();
        repo.insert(
            "news",
            ManagementEntry::new("old", 3).with_field("expiration_date", "en-US", "2025-10-01T10:00-03:00"),
        )
        .await;
        repo.insert(
            "news",
            ManagementEntry::new("new", 3).with_field("expiration_date", "en-US", "2025-10-30T10:00Z"),
        )
        .await;
        repo.insert("news", ManagementEntry::new("never", 1)).await;

        let filters = HashMap::from([(
            "fields.expiration_date[lte]".to_string(),
            "2025-10-01T13:00:00Z".to_string(),
        )]);
        let found = repo.query("news", &filters).await.unwrap();

        assert_eq!(found.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["old"]);
    }

    #[tokio::test]
    async fn delete_requires_unpublished_current_version() {
        let repo = InMemoryManagementRepository::default();
        let entry = ManagementEntry::new("e1", 4).published(3);
        repo.insert("news", entry.clone()).await;

        assert!(repo.delete(&entry).await.is_err());

        let unpublished = repo.unpublish(&entry).await.unwrap();
        assert_eq!(unpublished.version, 5);
        assert!(!unpublished.is_published());

        assert!(matches!(
            repo.delete(&entry).await,
            Err(SourceError::Status { status: 409, .. })
        ));
        repo.delete(&unpublished).await.unwrap();
        assert!(repo.entry_ids().await.is_empty());
    }

    #[tokio::test]
    async fn replication_lag_hides_entry_temporarily() {
        let repo = InMemoryContentRepository::new();
        repo.insert("news", RawEntry::new("a")).await;
        repo.set_replication_lag("a", 2).await;

        assert!(repo.fetch_by_id("a").await.unwrap().is_none());
        assert!(repo.fetch_by_id("a").await.unwrap().is_none());
        assert!(repo.fetch_by_id("a").await.unwrap().is_some());
        assert_eq!(repo.fetch_by_id_calls("a").await, 3);
    }
}
