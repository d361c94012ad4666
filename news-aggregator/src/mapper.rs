use crate::timestamp::{normalize_to_zone, parse_flex};
use crate::types::{AggregatorError, NewsItem, RawEntry, Result};
use chrono_tz::Tz;
use tracing::debug;

pub const FIELD_TITLE: &str = "title";
pub const FIELD_ACTIVE: &str = "is_active";
pub const FIELD_IMAGE: &str = "image";
pub const FIELD_EXPIRATION_DATE: &str = "expiration_date";
pub const FIELD_SHOW_ON_WEB: &str = "isMobyWeb";
pub const FIELD_SHOW_ON_APP: &str = "isMobyApp";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_URL: &str = "url";
pub const FIELD_PRIORITY: &str = "priority";

/// Converts delivery API entries into [`NewsItem`]s.
#[derive(Debug, Clone, Copy)]
pub struct EntryMapper {
    reference_zone: Tz,
}

impl EntryMapper {
    pub fn new(reference_zone: Tz) -> Self {
        Self { reference_zone }
    }

    pub fn reference_zone(&self) -> Tz {
        self.reference_zone
    }

    pub fn map(&self, entry: &RawEntry) -> Result<NewsItem> {
        let created_raw = entry.created_at.as_deref().ok_or_else(|| AggregatorError::MalformedData {
            entry_id: entry.id.clone(),
            field: "createdAt",
            value: String::new(),
            reason: "missing".to_string(),
        })?;

        let created_at = parse_flex(created_raw)
            .and_then(|created| normalize_to_zone(created, self.reference_zone))
            .map_err(|e| AggregatorError::MalformedData {
                entry_id: entry.id.clone(),
                field: "createdAt",
                value: created_raw.to_string(),
                reason: e.to_string(),
            })?;

        // Expiration keeps whatever offset it was authored with.
        let expiration_date = match entry.str_field(FIELD_EXPIRATION_DATE) {
            Some(raw) => Some(parse_flex(raw).map_err(|e| AggregatorError::MalformedData {
                entry_id: entry.id.clone(),
                field: FIELD_EXPIRATION_DATE,
                value: raw.to_string(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        let title = entry.str_field(FIELD_TITLE).unwrap_or_default().to_string();
        if title.is_empty() {
            debug!("Entry {} has no title", entry.id);
        }

        Ok(NewsItem {
            id: entry.id.clone(),
            title,
            active: entry.bool_field(FIELD_ACTIVE).unwrap_or(false),
            image_url: entry.linked_asset_url(FIELD_IMAGE).map(str::to_string),
            description: entry.str_field(FIELD_DESCRIPTION).map(str::to_string),
            show_on_app: entry.bool_field(FIELD_SHOW_ON_APP).unwrap_or(false),
            show_on_web: entry.bool_field(FIELD_SHOW_ON_WEB).unwrap_or(false),
            external_url: entry.str_field(FIELD_URL).map(str::to_string),
            expiration_date,
            created_at,
            priority: entry.bool_field(FIELD_PRIORITY).unwrap_or(false),
        })
    }

    /// Map every entry, failing the whole batch on the first malformed one.
    pub fn map_all(&self, entries: &[RawEntry]) -> Result<Vec<NewsItem>> {
        entries.iter().map(|entry| self.map(entry)).collect()
    }
}
