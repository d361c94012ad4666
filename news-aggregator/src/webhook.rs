use interfaces::json::first_nested_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENTRY_TOPIC_PREFIX: &str = "ContentManagement.Entry.";
pub const PUBLISH_TOPIC: &str = "ContentManagement.Entry.publish";
pub const UNPUBLISH_TOPIC: &str = "ContentManagement.Entry.unpublish";

const ENTRY_ID_PATHS: &[&[&str]] = &[&["sys", "id"], &["entity", "sys", "id"]];

/// What a notification topic asks us to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Publish,
    Unpublish,
    /// Some other entry event (save, archive, delete...). Only invalidates.
    OtherEntry,
    Unrelated,
}

/// A change notification as delivered by the repository's webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub topic: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl ChangeNotification {
    pub fn new(topic: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self.topic.as_str() {
            PUBLISH_TOPIC => ChangeKind::Publish,
            UNPUBLISH_TOPIC => ChangeKind::Unpublish,
            topic if topic.starts_with(ENTRY_TOPIC_PREFIX) => ChangeKind::OtherEntry,
            _ => ChangeKind::Unrelated,
        }
    }

    /// Every entry topic invalidates cached rankings.
    pub fn invalidates_cache(&self) -> bool {
        self.kind() != ChangeKind::Unrelated
    }

    /// `payload.sys.id`, falling back to `payload.entity.sys.id`.
    pub fn entry_id(&self) -> Option<&str> {
        first_nested_str(self.payload.as_ref()?, ENTRY_ID_PATHS)
    }
}

/// Result of processing one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Entry resolved after publish and an upsert event went out.
    Upserted { id: String },
    /// A removal event went out; `resolved` tells whether it carried the item.
    Removed { id: String, resolved: bool },
    /// Publish whose entry never became visible. Nothing was sent.
    NotPropagated { id: String },
    /// Publish or unpublish without an entry id in the payload.
    MissingEntryId,
    /// No event-worthy action for this topic.
    Ignored,
}
