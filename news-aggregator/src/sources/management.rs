use super::{build_client, ensure_success, entries_url, read_json, transport, with_segments, WireEntry, WirePage};
use crate::config::AggregatorConfig;
use crate::types::{ManagementEntry, ManagementRepository, Result, SourceError};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use tracing::{debug, info};
use url::Url;

const VERSION_HEADER: &str = "X-Contentful-Version";

/// Authoring API client. Every mutation carries the entry version it was
/// based on; the API rejects stale versions.
pub struct ManagementClient {
    client: Client,
    entries_url: Url,
    token: String,
    page_size: usize,
}

impl ManagementClient {
    pub fn new(config: &AggregatorConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(&config.fetch)?,
            entries_url: entries_url(&config.management_url, &config.space_id, &config.environment)?,
            token: config.management_token.clone(),
            page_size: config.fetch.page_size.max(1),
        })
    }
}

fn to_management_entry(entry: WireEntry) -> ManagementEntry {
    ManagementEntry {
        id: entry.sys.id,
        version: entry.sys.version.unwrap_or(0),
        published_version: entry.sys.published_version,
        fields: entry.fields,
    }
}

#[async_trait]
impl ManagementRepository for ManagementClient {
    async fn query(
        &self,
        content_type: &str,
        filters: &HashMap<String, String>,
    ) -> std::result::Result<Vec<ManagementEntry>, SourceError> {
        let mut entries = Vec::new();
        let mut skip = 0usize;

        loop {
            debug!("Querying {} entries (skip {}) with {:?}", content_type, skip, filters);
            let response = self
                .client
                .get(self.entries_url.clone())
                .bearer_auth(&self.token)
                .query(&[
                    ("content_type", content_type.to_string()),
                    ("skip", skip.to_string()),
                    ("limit", self.page_size.to_string()),
                ])
                .query(filters)
                .send()
                .await
                .map_err(transport)?;
            let page: WirePage = read_json(response).await?;

            let total = page.total;
            let received = page.items.len();
            entries.extend(page.items.into_iter().map(to_management_entry));
            skip += received;

            if received == 0 || skip >= total {
                break;
            }
        }

        Ok(entries)
    }

    async fn unpublish(&self, entry: &ManagementEntry) -> std::result::Result<ManagementEntry, SourceError> {
        let url = with_segments(&self.entries_url, &[entry.id.as_str(), "published"])?;
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.token)
            .header(VERSION_HEADER, entry.version)
            .send()
            .await
            .map_err(transport)?;
        let updated: WireEntry = read_json(response).await?;

        info!("Unpublished entry {} (version {})", entry.id, entry.version);
        Ok(to_management_entry(updated))
    }

    async fn delete(&self, entry: &ManagementEntry) -> std::result::Result<(), SourceError> {
        let url = with_segments(&self.entries_url, &[entry.id.as_str()])?;
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.token)
            .header(VERSION_HEADER, entry.version)
            .send()
            .await
            .map_err(transport)?;
        ensure_success(response).await?;

        info!("Deleted entry {} (version {})", entry.id, entry.version);
        Ok(())
    }
}
