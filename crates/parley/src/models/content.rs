use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

/// Where the bytes of an attachment live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

impl MediaSource {
    /// Render as a URL, using a data URI for inline content
    pub fn to_url(&self) -> String {
        match self {
            MediaSource::Base64 { media_type, data } => {
                format!("data:{};base64,{}", media_type, data)
            }
            MediaSource::Url { url } => url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    pub source: MediaSource,
}

/// An opaque reasoning item returned by a vendor. It is replayed verbatim to
/// the vendor that produced it and skipped for every other vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningContent {
    pub provider: String,
    pub item: Value,
}

impl ReasoningContent {
    pub fn new<S: Into<String>>(provider: S, item: Value) -> Self {
        Self {
            provider: provider.into(),
            item,
        }
    }
}
