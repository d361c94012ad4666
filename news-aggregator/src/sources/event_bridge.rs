use super::{build_client, ensure_success, transport, with_segments};
use crate::types::{EventSink, FetchConfig, Result, SourceError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

/// Produce calls on the bridge are rejected with plain `application/json`.
const PRODUCE_CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";

#[derive(Serialize)]
struct Record<'a> {
    value: &'a str,
}

#[derive(Serialize)]
struct ProduceRequest<'a> {
    records: [Record<'a>; 1],
}

/// Publishes to a message bus through its REST bridge:
/// `POST {bridge}/topics/{topic}` with `{"records":[{"value": payload}]}`.
pub struct HttpEventSink {
    client: Client,
    bridge_url: Url,
}

impl HttpEventSink {
    pub fn new(bridge_url: &str, fetch: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(fetch)?,
            bridge_url: Url::parse(bridge_url)?,
        })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn publish(&self, topic: &str, payload: String) -> std::result::Result<(), SourceError> {
        let url = with_segments(&self.bridge_url, &["topics", topic])?;

        let request = ProduceRequest {
            records: [Record { value: &payload }],
        };
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, PRODUCE_CONTENT_TYPE)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        ensure_success(response).await?;

        debug!("Bridge accepted {} bytes for topic {}", payload.len(), topic);
        Ok(())
    }
}

/// Sink for local runs without a bus: every message goes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, topic: &str, payload: String) -> std::result::Result<(), SourceError> {
        info!("[{}] {}", topic, payload);
        Ok(())
    }
}
