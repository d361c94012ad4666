use super::{build_client, entries_url, read_json, transport, WireEntry, WirePage};
use crate::config::AggregatorConfig;
use crate::types::{ContentRepository, RawEntry, Result, SourceError};
use async_trait::async_trait;
use interfaces::json::nested_str;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use tracing::{debug, info};
use url::Url;

/// Delivery (read-only, CDN backed) API client.
pub struct DeliveryClient {
    client: Client,
    entries_url: Url,
    token: String,
    locale: String,
    page_size: usize,
}

impl DeliveryClient {
    pub fn new(config: &AggregatorConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(&config.fetch)?,
            entries_url: entries_url(&config.delivery_url, &config.space_id, &config.environment)?,
            token: config.delivery_token.clone(),
            locale: config.locale.clone(),
            page_size: config.fetch.page_size.max(1),
        })
    }

    async fn get_page(&self, params: &[(&str, String)]) -> std::result::Result<WirePage, SourceError> {
        debug!("GET {} {:?}", self.entries_url, params);
        let response = self
            .client
            .get(self.entries_url.clone())
            .bearer_auth(&self.token)
            .query(&[("locale", self.locale.as_str())])
            .query(params)
            .send()
            .await
            .map_err(transport)?;
        read_json(response).await
    }
}

/// Resolve the entries of a page, attaching the file URL of every asset an
/// entry links to.
fn resolve_page(page: WirePage) -> Vec<RawEntry> {
    let asset_urls: HashMap<String, String> = page
        .includes
        .assets
        .iter()
        .filter_map(|asset| {
            asset
                .fields
                .get("file")
                .and_then(|file| nested_str(file, &["url"]))
                .map(|url| (asset.sys.id.clone(), url.to_string()))
        })
        .collect();

    page.items
        .into_iter()
        .map(|entry| to_raw_entry(entry, &asset_urls))
        .collect()
}

fn to_raw_entry(entry: WireEntry, asset_urls: &HashMap<String, String>) -> RawEntry {
    let assets = entry
        .fields
        .values()
        .filter(|value| nested_str(value, &["sys", "linkType"]) == Some("Asset"))
        .filter_map(|value| nested_str(value, &["sys", "id"]))
        .filter_map(|id| asset_urls.get(id).map(|url| (id.to_string(), url.clone())))
        .collect();

    RawEntry {
        id: entry.sys.id,
        created_at: entry.sys.created_at,
        fields: entry.fields,
        assets,
    }
}

#[async_trait]
impl ContentRepository for DeliveryClient {
    async fn fetch_all(&self, content_type: &str, limit: Option<usize>) -> std::result::Result<Vec<RawEntry>, SourceError> {
        // A bounded request is a single page; otherwise page through everything.
        if let Some(limit) = limit {
            let page = self
                .get_page(&[
                    ("content_type", content_type.to_string()),
                    ("limit", limit.to_string()),
                ])
                .await?;
            return Ok(resolve_page(page));
        }

        let mut entries = Vec::new();
        let mut skip = 0usize;
        loop {
            let page = self
                .get_page(&[
                    ("content_type", content_type.to_string()),
                    ("skip", skip.to_string()),
                    ("limit", self.page_size.to_string()),
                ])
                .await?;
            let total = page.total;
            let received = page.items.len();
            entries.extend(resolve_page(page));
            skip += received;

            if received == 0 || skip >= total {
                break;
            }
        }

        info!("Fetched {} {} entries from delivery API", entries.len(), content_type);
        Ok(entries)
    }

    async fn fetch_by_id(&self, id: &str) -> std::result::Result<Option<RawEntry>, SourceError> {
        match self.get_page(&[("sys.id", id.to_string())]).await {
            Ok(page) => Ok(resolve_page(page).into_iter().next()),
            Err(SourceError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
