pub mod delivery;
pub mod event_bridge;
pub mod management;
pub mod memory;

pub use delivery::DeliveryClient;
pub use event_bridge::{HttpEventSink, LogEventSink};
pub use management::ManagementClient;
pub use memory::{
    InMemoryContentRepository, InMemoryManagementRepository, ManagementCall, RecordingEventSink,
};

use crate::types::{FetchConfig, Result, SourceError};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

/// `sys` block shared by entries and assets on both APIs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireSys {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub published_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireEntry {
    pub sys: WireSys,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireIncludes {
    #[serde(default, rename = "Asset")]
    pub assets: Vec<WireEntry>,
}

/// One page of a collection response.
#[derive(Debug, Deserialize)]
pub(crate) struct WirePage {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub items: Vec<WireEntry>,
    #[serde(default)]
    pub includes: WireIncludes,
}

pub(crate) fn build_client(config: &FetchConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .build()?;
    Ok(client)
}

/// `{base}/spaces/{space}/environments/{environment}/entries`
pub(crate) fn entries_url(base: &str, space_id: &str, environment: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(["spaces", space_id, "environments", environment, "entries"]);
    Ok(url)
}

/// Append path segments to a copy of `base`.
pub(crate) fn with_segments(base: &Url, segments: &[&str]) -> std::result::Result<Url, SourceError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SourceError::Transport(format!("cannot extend URL {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn transport(e: reqwest::Error) -> SourceError {
    SourceError::Transport(e.to_string())
}

pub(crate) async fn ensure_success(response: Response) -> std::result::Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Status {
        status: status.as_u16(),
        body,
    })
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> std::result::Result<T, SourceError> {
    ensure_success(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| SourceError::Decode(e.to_string()))
}
