use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::configs::RequestOptions;
use super::factory::ProviderType;
use crate::models::content::ReasoningContent;
use crate::models::message::Message;
use crate::models::tool::{ToolCall, ToolDefinition};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<u32>,
        output_tokens: Option<u32>,
        total_tokens: Option<u32>,
    ) -> Self {
        let total_tokens = total_tokens.or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// How a single streamed turn ended normally
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// The assistant text of the turn, cumulative
    pub text: String,
    /// Opaque reasoning items to replay on the next request
    pub reasoning: Vec<ReasoningContent>,
    pub usage: Option<Usage>,
}

impl Completion {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// One item of a provider stream.
///
/// A stream ends with exactly one `Completed` or `Failed` and yields nothing
/// after it. `ToolCall`s, if any, come before the `Completed` of their turn.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Delta(String),
    ToolCall(ToolCall),
    Completed(Completion),
    Failed(String),
}

pub type ProviderStream<'a> = BoxStream<'a, StreamItem>;

/// Everything an adapter needs to issue one streamed request
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
    pub options: &'a RequestOptions,
}

/// Base trait for AI providers (OpenAI, Anthropic, etc)
pub trait Provider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Send the transcript and stream the vendor's response as normalized items.
    ///
    /// Vendor-level problems (transport, status, timeouts, error frames) are
    /// reported as a final `StreamItem::Failed`, never as a panic or a dropped stream.
    fn stream<'a>(&'a self, request: CompletionRequest<'a>) -> ProviderStream<'a>;
}
