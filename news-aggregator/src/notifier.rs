use crate::types::{EventSink, NewsItem, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "NEWS_UPSERT")]
    NewsUpsert,
    #[serde(rename = "REMOVED")]
    Removed,
}

/// Wire shape of a change event: `{"type": ..., "id": ..., "item": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub id: String,
    pub item: Option<NewsItem>,
}

impl NewsEvent {
    pub fn upsert(item: NewsItem) -> Self {
        Self {
            kind: EventKind::NewsUpsert,
            id: item.id.clone(),
            item: Some(item),
        }
    }

    pub fn removed(id: &str, item: Option<NewsItem>) -> Self {
        Self {
            kind: EventKind::Removed,
            id: id.to_string(),
            item,
        }
    }
}

/// Publishes news change events to a single topic.
///
/// Delivery is fire-and-forget: a sink failure is logged and swallowed.
/// Failing to serialize an event is a bug on our side and is returned.
pub struct EventNotifier {
    sink: Arc<dyn EventSink>,
    topic: String,
}

impl EventNotifier {
    pub fn new(sink: Arc<dyn EventSink>, topic: impl Into<String>) -> Self {
        Self {
            sink,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn notify_upsert(&self, item: &NewsItem) -> Result<()> {
        self.emit(NewsEvent::upsert(item.clone())).await
    }

    pub async fn notify_removed(&self, item: Option<&NewsItem>, id: &str) -> Result<()> {
        self.emit(NewsEvent::removed(id, item.cloned())).await
    }

    pub async fn send_raw(&self, message: &str) -> Result<()> {
        info!("Sending raw message to topic {}", self.topic);
        self.deliver(message.to_string()).await;
        Ok(())
    }

    async fn emit(&self, event: NewsEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        info!("Publishing {:?} for {} to topic {}", event.kind, event.id, self.topic);
        self.deliver(payload).await;
        Ok(())
    }

    async fn deliver(&self, payload: String) {
        match self.sink.publish(&self.topic, payload).await {
            Ok(()) => debug!("Delivered event to topic {}", self.topic),
            Err(e) => error!("Failed to deliver event to topic {}: {}", self.topic, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::memory::RecordingEventSink;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    fn news(id: &str) -> NewsItem {
        NewsItem {
            id: id.to_string(),
            title: "Release notes".to_string(),
            active: true,
            image_url: Some("//images.example.com/a.png".to_string()),
            description: None,
            show_on_app: true,
            show_on_web: false,
            external_url: None,
            expiration_date: None,
            created_at: Utc.with_ymd_and_hms(2025, 10, 15, 9, 30, 0).unwrap().fixed_offset(),
            priority: true,
        }
    }

    #[tokio::test]
    async fn upsert_event_carries_item() {
        let sink = Arc::new(RecordingEventSink::new());
        let notifier = EventNotifier::new(sink.clone(), "websocket");

        notifier.notify_upsert(&news("n1")).await.unwrap();

        let sent = sink.messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "websocket");
        let body: Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(body["type"], "NEWS_UPSERT");
        assert_eq!(body["id"], "n1");
        assert_eq!(body["item"]["showOnApp"], json!(true));
        let created = body["item"]["createdAt"].as_str().unwrap();
        assert_eq!(
            chrono::DateTime::parse_from_rfc3339(created).unwrap(),
            Utc.with_ymd_and_hms(2025, 10, 15, 9, 30, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn removal_without_item_serializes_null() {
        let sink = Arc::new(RecordingEventSink::new());
        let notifier = EventNotifier::new(sink.clone(), "websocket");

        notifier.notify_removed(None, "gone").await.unwrap();

        let sent = sink.messages().await;
        let body: Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(body, json!({"type": "REMOVED", "id": "gone", "item": null}));
    }

    #[tokio::test]
    async fn sink_failures_are_swallowed() {
        let sink = Arc::new(RecordingEventSink::failing());
        let notifier = EventNotifier::new(sink.clone(), "websocket");

        assert!(notifier.notify_upsert(&news("n1")).await.is_ok());
        assert!(notifier.send_raw("ping").await.is_ok());
        assert_eq!(sink.attempts(), 2);
    }
}
