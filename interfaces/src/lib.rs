pub mod defs;
pub mod json;

pub use defs::{
    Audience, ContentRepository, EventSink, ManagementEntry, ManagementRepository, NewsItem,
    RawEntry, SourceError,
};
