use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::base::{Completion, CompletionRequest, Provider, ProviderStream, StreamItem, Usage};
use super::configs::OpenAiProviderConfig;
use super::factory::ProviderType;
use super::utils::{send_streaming, sse_frames, system_text};
use crate::errors::{ConfigError, ProviderError};
use crate::models::content::ReasoningContent;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{ToolCall, ToolDefinition};

pub const OPENAI_HOST: &str = "https://api.openai.com";
const PROVIDER: &str = "OpenAI";
/// `ReasoningContent::provider` tag for items replayed to the Responses API
pub const REASONING_TAG: &str = "openai";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, request: &CompletionRequest<'_>) -> Value {
        let mut payload = json!({
            "model": request.model,
            "input": messages_to_openai_input(request.messages),
            "stream": true,
        });

        if let Some(system) = system_text(request.messages) {
            payload["instructions"] = json!(system);
        }
        if !request.tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(request.tools));
        }
        if let Some(temperature) = request.options.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_output_tokens) = request.options.max_output_tokens {
            payload["max_output_tokens"] = json!(max_output_tokens);
        }

        payload
    }
}

impl Provider for OpenAiProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAi
    }

    fn stream<'a>(&'a self, request: CompletionRequest<'a>) -> ProviderStream<'a> {
        Box::pin(async_stream::stream! {
            let url = format!("{}/v1/responses", self.config.host.trim_end_matches('/'));
            let payload = self.build_payload(&request);
            let read_timeout = request.options.read_timeout;

            let builder = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .json(&payload);
            let body = match send_streaming(builder, PROVIDER, read_timeout).await {
                Ok(body) => body,
                Err(e) => {
                    yield StreamItem::Failed(e.to_string());
                    return;
                }
            };

            let mut frames = sse_frames(body, read_timeout);
            let mut streamed = String::new();

            while let Some(frame) = frames.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        yield StreamItem::Failed(e.to_string());
                        return;
                    }
                };
                if frame.is_done() {
                    continue;
                }
                let data: Value = match serde_json::from_str(&frame.data) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping undecodable OpenAI frame");
                        continue;
                    }
                };
                let kind = data
                    .get("type")
                    .and_then(Value::as_str)
                    .or(frame.event.as_deref())
                    .unwrap_or_default();

                match kind {
                    "response.output_text.delta" => {
                        if let Some(delta) = data.get("delta").and_then(Value::as_str) {
                            if !delta.is_empty() {
                                streamed.push_str(delta);
                                yield StreamItem::Delta(delta.to_string());
                            }
                        }
                    }
                    "response.completed" => {
                        let response = &data["response"];
                        let (calls, reasoning, text) = fan_out_output(&response["output"]);
                        for call in calls {
                            yield StreamItem::ToolCall(call);
                        }
                        yield StreamItem::Completed(Completion {
                            text: if text.is_empty() { streamed } else { text },
                            reasoning,
                            usage: get_usage(&response["usage"]),
                        });
                        return;
                    }
                    "response.failed" => {
                        let message = data["response"]["error"]["message"]
                            .as_str()
                            .unwrap_or("response failed");
                        yield StreamItem::Failed(vendor_error(message));
                        return;
                    }
                    "response.incomplete" => {
                        let reason = data["response"]["incomplete_details"]["reason"]
                            .as_str()
                            .unwrap_or("unknown");
                        yield StreamItem::Failed(vendor_error(&format!(
                            "response incomplete: {}",
                            reason
                        )));
                        return;
                    }
                    "error" => {
                        let message = data
                            .get("message")
                            .and_then(Value::as_str)
                            .or_else(|| data["error"]["message"].as_str())
                            .unwrap_or("unknown error");
                        yield StreamItem::Failed(vendor_error(message));
                        return;
                    }
                    _ => {}
                }
            }

            yield StreamItem::Failed(ProviderError::UnexpectedEnd(PROVIDER).to_string());
        })
    }
}

fn vendor_error(message: &str) -> String {
    ProviderError::Vendor {
        provider: PROVIDER,
        message: message.to_string(),
    }
    .to_string()
}

/// Split a completed response's `output[]` into tool calls, reasoning items and text
fn fan_out_output(output: &Value) -> (Vec<ToolCall>, Vec<ReasoningContent>, String) {
    let mut calls = Vec::new();
    let mut reasoning = Vec::new();
    let mut text = String::new();

    for item in output.as_array().into_iter().flatten() {
        match item.get("type").and_then(Value::as_str) {
            Some("function_call") => {
                let id = item
                    .get("call_id")
                    .or_else(|| item.get("id"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
                let arguments = item
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!(""));
                calls.push(ToolCall::new(id, name, arguments));
            }
            Some("reasoning") => reasoning.push(ReasoningContent::new(REASONING_TAG, item.clone())),
            Some("message") => {
                for part in item["content"].as_array().into_iter().flatten() {
                    if part.get("type").and_then(Value::as_str) == Some("output_text") {
                        text.push_str(part.get("text").and_then(Value::as_str).unwrap_or_default());
                    }
                }
            }
            _ => {}
        }
    }

    (calls, reasoning, text)
}

fn get_usage(usage: &Value) -> Option<Usage> {
    if !usage.is_object() {
        return None;
    }
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).map(|v| v as u32);
    Some(Usage::new(
        count("input_tokens"),
        count("output_tokens"),
        count("total_tokens"),
    ))
}

/// Convert the transcript into Responses API `input` items.
///
/// System messages are omitted; they travel as `instructions`.
pub fn messages_to_openai_input(messages: &[Message]) -> Vec<Value> {
    let mut input = Vec::new();

    for message in messages {
        if message.role == Role::System {
            continue;
        }
        let mut parts: Vec<Value> = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        let part_type = if message.role == Role::Assistant {
                            "output_text"
                        } else {
                            "input_text"
                        };
                        parts.push(json!({"type": part_type, "text": text.text}));
                    }
                }
                MessageContent::Image(image) => {
                    parts.push(json!({
                        "type": "input_image",
                        "image_url": image.source.to_url(),
                    }));
                }
                MessageContent::Reasoning(reasoning) => {
                    if reasoning.provider == REASONING_TAG {
                        flush_message(&mut input, message.role, &mut parts);
                        input.push(reasoning.item.clone());
                    }
                }
                MessageContent::ToolRequest(call) => {
                    flush_message(&mut input, message.role, &mut parts);
                    input.push(json!({
                        "type": "function_call",
                        "call_id": call.id,
                        "name": call.name,
                        "arguments": call.arguments_string(),
                    }));
                }
                MessageContent::ToolResponse(result) => {
                    flush_message(&mut input, message.role, &mut parts);
                    input.push(json!({
                        "type": "function_call_output",
                        "call_id": result.tool_call_id,
                        "output": result.output_text(),
                    }));
                }
            }
        }
        flush_message(&mut input, message.role, &mut parts);
    }

    input
}

fn flush_message(input: &mut Vec<Value>, role: Role, parts: &mut Vec<Value>) {
    if parts.is_empty() {
        return;
    }
    let role = match role {
        Role::Assistant => "assistant",
        _ => "user",
    };
    input.push(json!({
        "role": role,
        "content": std::mem::take(parts),
    }));
}

/// Convert tool definitions into Responses API function tools
pub fn tools_to_openai_spec(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let mut spec = Map::new();
            spec.insert("type".to_string(), json!("function"));
            spec.insert("name".to_string(), json!(tool.name));
            spec.insert("description".to_string(), json!(tool.description));
            spec.insert("parameters".to_string(), tool.input_schema());
            Value::Object(spec)
        })
        .collect()
}
