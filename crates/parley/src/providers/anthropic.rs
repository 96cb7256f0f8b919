use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::base::{Completion, CompletionRequest, Provider, ProviderStream, StreamItem, Usage};
use super::configs::{AnthropicProviderConfig, ANTHROPIC_DEFAULT_MAX_TOKENS};
use super::factory::ProviderType;
use super::utils::{send_streaming, sse_frames, system_text};
use crate::errors::{ConfigError, ProviderError};
use crate::models::content::MediaSource;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{ToolCall, ToolDefinition};

pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "Anthropic";

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

/// A `tool_use` block whose input is still arriving
struct PendingToolUse {
    id: String,
    name: String,
    input: String,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, request: &CompletionRequest<'_>) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": messages_to_anthropic_spec(request.messages),
            "max_tokens": request
                .options
                .max_output_tokens
                .unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        if let Some(system) = system_text(request.messages) {
            payload["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            payload["tools"] = json!(tools_to_anthropic_spec(request.tools));
        }
        if let Some(temperature) = request.options.temperature {
            payload["temperature"] = json!(temperature);
        }

        payload
    }
}

impl Provider for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn stream<'a>(&'a self, request: CompletionRequest<'a>) -> ProviderStream<'a> {
        Box::pin(async_stream::stream! {
            let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));
            let payload = self.build_payload(&request);
            let read_timeout = request.options.read_timeout;

            let builder = self
                .client
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", ANTHROPIC_API_VERSION)
                .json(&payload);
            let body = match send_streaming(builder, PROVIDER, read_timeout).await {
                Ok(body) => body,
                Err(e) => {
                    yield StreamItem::Failed(e.to_string());
                    return;
                }
            };

            let mut frames = sse_frames(body, read_timeout);
            let mut text = String::new();
            let mut pending: BTreeMap<u64, PendingToolUse> = BTreeMap::new();
            let mut input_tokens = None;
            let mut output_tokens = None;

            while let Some(frame) = frames.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        yield StreamItem::Failed(e.to_string());
                        return;
                    }
                };
                let data: Value = match serde_json::from_str(&frame.data) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping undecodable Anthropic frame");
                        continue;
                    }
                };
                let kind = data
                    .get("type")
                    .and_then(Value::as_str)
                    .or(frame.event.as_deref())
                    .unwrap_or_default();
                let index = data.get("index").and_then(Value::as_u64).unwrap_or_default();

                match kind {
                    "message_start" => {
                        input_tokens = token_count(&data["message"]["usage"], "input_tokens");
                    }
                    "content_block_start" => {
                        let block = &data["content_block"];
                        match block.get("type").and_then(Value::as_str) {
                            Some("tool_use") => {
                                pending.insert(index, PendingToolUse {
                                    id: block["id"].as_str().unwrap_or_default().to_string(),
                                    name: block["name"].as_str().unwrap_or_default().to_string(),
                                    input: String::new(),
                                });
                            }
                            Some("text") => {
                                let initial = block["text"].as_str().unwrap_or_default();
                                if !initial.is_empty() {
                                    text.push_str(initial);
                                    yield StreamItem::Delta(initial.to_string());
                                }
                            }
                            _ => {}
                        }
                    }
                    "content_block_delta" => {
                        let delta = &data["delta"];
                        match delta.get("type").and_then(Value::as_str) {
                            Some("text_delta") => {
                                let chunk = delta["text"].as_str().unwrap_or_default();
                                if !chunk.is_empty() {
                                    text.push_str(chunk);
                                    yield StreamItem::Delta(chunk.to_string());
                                }
                            }
                            Some("input_json_delta") => {
                                if let Some(tool_use) = pending.get_mut(&index) {
                                    tool_use
                                        .input
                                        .push_str(delta["partial_json"].as_str().unwrap_or_default());
                                }
                            }
                            _ => {}
                        }
                    }
                    "message_delta" => {
                        output_tokens = token_count(&data["usage"], "output_tokens").or(output_tokens);
                        if data["delta"]["stop_reason"].as_str() == Some("tool_use") {
                            for call in drain_tool_uses(&mut pending) {
                                yield StreamItem::ToolCall(call);
                            }
                            yield StreamItem::Completed(Completion {
                                text,
                                reasoning: Vec::new(),
                                usage: Some(Usage::new(input_tokens, output_tokens, None)),
                            });
                            return;
                        }
                    }
                    "message_stop" => {
                        for call in drain_tool_uses(&mut pending) {
                            yield StreamItem::ToolCall(call);
                        }
                        yield StreamItem::Completed(Completion {
                            text,
                            reasoning: Vec::new(),
                            usage: Some(Usage::new(input_tokens, output_tokens, None)),
                        });
                        return;
                    }
                    "error" => {
                        let message = data["error"]["message"].as_str().unwrap_or("unknown error");
                        yield StreamItem::Failed(
                            ProviderError::Vendor {
                                provider: PROVIDER,
                                message: message.to_string(),
                            }
                            .to_string(),
                        );
                        return;
                    }
                    _ => {}
                }
            }

            yield StreamItem::Failed(ProviderError::UnexpectedEnd(PROVIDER).to_string());
        })
    }
}

fn token_count(usage: &Value, key: &str) -> Option<u32> {
    usage.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

/// Buffered tool uses in content block order, with their raw JSON input
fn drain_tool_uses(pending: &mut BTreeMap<u64, PendingToolUse>) -> Vec<ToolCall> {
    std::mem::take(pending)
        .into_values()
        .map(|tool_use| ToolCall::new(tool_use.id, tool_use.name, Value::String(tool_use.input)))
        .collect()
}

/// Convert the transcript into Anthropic's message array.
///
/// System text travels separately. Tool results become `tool_result` blocks in a
/// user turn, and consecutive turns of the same role are merged since the API
/// requires alternation.
pub fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
    let mut spec: Vec<Value> = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::System => continue,
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        };

        let mut blocks = Vec::new();
        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        blocks.push(json!({"type": "text", "text": text.text}));
                    }
                }
                MessageContent::Image(image) => {
                    let source = match &image.source {
                        MediaSource::Base64 { media_type, data } => json!({
                            "type": "base64",
                            "media_type": media_type,
                            "data": data,
                        }),
                        MediaSource::Url { url } => json!({"type": "url", "url": url}),
                    };
                    blocks.push(json!({"type": "image", "source": source}));
                }
                MessageContent::ToolRequest(call) => {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments_object(),
                    }));
                }
                MessageContent::ToolResponse(result) => {
                    blocks.push(json!({
                        "type": "tool_result",
                        "tool_use_id": result.tool_call_id,
                        "content": result.output_text(),
                        "is_error": result.is_error,
                    }));
                }
                MessageContent::Reasoning(_) => {}
            }
        }
        if blocks.is_empty() {
            continue;
        }

        match spec.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(existing) = last["content"].as_array_mut() {
                    existing.extend(blocks);
                }
            }
            _ => spec.push(json!({"role": role, "content": blocks})),
        }
    }

    spec
}

pub fn tools_to_anthropic_spec(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema(),
            })
        })
        .collect()
}
