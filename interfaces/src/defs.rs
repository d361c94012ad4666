use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::json::nested_str;

/// Delivery channel. Each news item carries one visibility flag per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Audience {
    App,
    Web,
}

impl Audience {
    pub const ALL: [Audience; 2] = [Audience::App, Audience::Web];

    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::App => "app",
            Audience::Web => "web",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "app" | "moby_app" => Ok(Audience::App),
            "web" | "moby_web" => Ok(Audience::Web),
            other => Err(format!("unknown audience '{}', expected 'app' or 'web'", other)),
        }
    }
}

/// A news item as served to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub active: bool,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub show_on_app: bool,
    pub show_on_web: bool,
    pub external_url: Option<String>,
    pub expiration_date: Option<DateTime<FixedOffset>>,
    pub created_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub priority: bool,
}

impl NewsItem {
    pub fn is_visible_to(&self, audience: Audience) -> bool {
        match audience {
            Audience::App => self.show_on_app,
            Audience::Web => self.show_on_web,
        }
    }

    /// Items without an expiration date never expire. Comparison happens in UTC
    /// regardless of the offset the expiration was authored with.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiration_date {
            None => true,
            Some(expiration) => expiration.with_timezone(&Utc) > now,
        }
    }
}

/// One record from the read-only delivery API, with fields already resolved
/// to a single locale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub id: String,
    pub created_at: Option<String>,
    pub fields: Map<String, Value>,
    /// Asset id -> file URL for the assets this entry links to.
    pub assets: HashMap<String, String>,
}

impl RawEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = Some(created_at.into());
        self
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Link `field` to an asset and register the asset's URL.
    pub fn with_asset(mut self, field: &str, asset_id: &str, url: &str) -> Self {
        let link = serde_json::json!({
            "sys": { "type": "Link", "linkType": "Asset", "id": asset_id }
        });
        self.fields.insert(field.to_string(), link);
        self.assets.insert(asset_id.to_string(), url.to_string());
        self
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(Value::as_bool)
    }

    pub fn linked_asset_url(&self, name: &str) -> Option<&str> {
        let asset_id = nested_str(self.fields.get(name)?, &["sys", "id"])?;
        self.assets.get(asset_id).map(String::as_str)
    }
}

/// One record from the authoring API. Fields are keyed by field id, then locale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagementEntry {
    pub id: String,
    pub version: u64,
    pub published_version: Option<u64>,
    pub fields: Map<String, Value>,
}

impl ManagementEntry {
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
            ..Default::default()
        }
    }

    pub fn published(mut self, published_version: u64) -> Self {
        self.published_version = Some(published_version);
        self
    }

    pub fn with_field(mut self, name: &str, locale: &str, value: impl Into<Value>) -> Self {
        let slot = self
            .fields
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(locales) = slot {
            locales.insert(locale.to_string(), value.into());
        }
        self
    }

    pub fn is_published(&self) -> bool {
        self.published_version.is_some()
    }

    pub fn field(&self, name: &str, locale: &str) -> Option<&Value> {
        self.fields.get(name)?.get(locale)
    }

    pub fn str_field(&self, name: &str, locale: &str) -> Option<&str> {
        self.field(name, locale).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("entry not found: {id}")]
    NotFound { id: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode upstream response: {0}")]
    Decode(String),
}

// Object style note:
// Implementations of these traits are shared between the request path, the
// change-notification path and the sweeper, so they are held behind `Arc`
// and must be safe to call concurrently. They own no cache of their own;
// every call goes to the upstream system.

/// Read-only, eventually consistent delivery API.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Fetch every entry of `content_type`, or at most `limit` entries when set.
    async fn fetch_all(&self, content_type: &str, limit: Option<usize>) -> Result<Vec<RawEntry>, SourceError>;

    /// `Ok(None)` means the entry is not (yet) visible.
    async fn fetch_by_id(&self, id: &str) -> Result<Option<RawEntry>, SourceError>;
}

/// Read-write authoring API, the system of record.
#[async_trait]
pub trait ManagementRepository: Send + Sync {
    async fn query(
        &self,
        content_type: &str,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<ManagementEntry>, SourceError>;

    /// Returns the entry as it stands after unpublishing (its version moves on).
    async fn unpublish(&self, entry: &ManagementEntry) -> Result<ManagementEntry, SourceError>;

    async fn delete(&self, entry: &ManagementEntry) -> Result<(), SourceError>;
}

/// Outbound message bus.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item() -> NewsItem {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        NewsItem {
            id: "n1".to_string(),
            title: "Title".to_string(),
            active: true,
            image_url: None,
            description: None,
            show_on_app: true,
            show_on_web: false,
            external_url: None,
            expiration_date: None,
            created_at: offset.with_ymd_and_hms(2025, 10, 15, 6, 30, 0).unwrap(),
            priority: false,
        }
    }

    #[test]
    fn audience_parses_case_insensitively() {
        assert_eq!("APP".parse::<Audience>(), Ok(Audience::App));
        assert_eq!("web".parse::<Audience>(), Ok(Audience::Web));
        assert!("tv".parse::<Audience>().is_err());
    }

    #[test]
    fn visibility_follows_channel_flag() {
        let news = item();
        assert!(news.is_visible_to(Audience::App));
        assert!(!news.is_visible_to(Audience::Web));
    }

    #[test]
    fn expiration_is_compared_in_utc() {
        let mut news = item();
        let now = Utc.with_ymd_and_hms(2025, 10, 15, 12, 0, 0).unwrap();
        assert!(news.is_live_at(now));

        // 10:00-03:00 is 13:00Z, still in the future at 12:00Z.
        let minus_three = FixedOffset::west_opt(3 * 3600).unwrap();
        news.expiration_date = Some(minus_three.with_ymd_and_hms(2025, 10, 15, 10, 0, 0).unwrap());
        assert!(news.is_live_at(now));

        news.expiration_date = Some(minus_three.with_ymd_and_hms(2025, 10, 15, 8, 59, 0).unwrap());
        assert!(!news.is_live_at(now));
    }

    #[test]
    fn news_item_serializes_camel_case() {
        let json = serde_json::to_value(item()).unwrap();
        assert_eq!(json["showOnApp"], Value::Bool(true));
        assert_eq!(json["createdAt"], Value::String("2025-10-15T06:30:00-03:00".to_string()));
        assert!(json["expirationDate"].is_null());
    }

    #[test]
    fn raw_entry_resolves_linked_asset() {
        let entry = RawEntry::new("e1").with_asset("image", "img1", "//images.example/a.png");
        assert_eq!(entry.linked_asset_url("image"), Some("//images.example/a.png"));
        assert_eq!(entry.linked_asset_url("thumbnail"), None);
    }

    #[test]
    fn management_entry_reads_localized_fields() {
        let entry = ManagementEntry::new("e1", 3)
            .published(2)
            .with_field("title", "en-US", "Hello");
        assert!(entry.is_published());
        assert_eq!(entry.str_field("title", "en-US"), Some("Hello"));
        assert_eq!(entry.str_field("title", "es-AR"), None);
    }
}
