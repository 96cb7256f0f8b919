use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::base::{Completion, CompletionRequest, Provider, ProviderStream, StreamItem, Usage};
use super::configs::OllamaProviderConfig;
use super::factory::ProviderType;
use super::utils::{generate_tool_call_id, lines, send_streaming};
use crate::errors::{ConfigError, ProviderError};
use crate::models::content::MediaSource;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{ToolCall, ToolDefinition};

pub const OLLAMA_HOST: &str = "http://localhost:11434";
const PROVIDER: &str = "Ollama";

pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, request: &CompletionRequest<'_>) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": messages_to_ollama_spec(request.messages),
            "stream": true,
        });

        if !request.tools.is_empty() {
            payload["tools"] = json!(tools_to_ollama_spec(request.tools));
        }

        let mut options = Map::new();
        if let Some(temperature) = request.options.temperature {
            options.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_output_tokens) = request.options.max_output_tokens {
            options.insert("num_predict".to_string(), json!(max_output_tokens));
        }
        if !options.is_empty() {
            payload["options"] = Value::Object(options);
        }

        payload
    }
}

impl Provider for OllamaProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ollama
    }

    fn stream<'a>(&'a self, request: CompletionRequest<'a>) -> ProviderStream<'a> {
        Box::pin(async_stream::stream! {
            let url = format!("{}/api/chat", self.config.host.trim_end_matches('/'));
            let payload = self.build_payload(&request);
            let read_timeout = request.options.read_timeout;

            let builder = self.client.post(&url).json(&payload);
            let body = match send_streaming(builder, PROVIDER, read_timeout).await {
                Ok(body) => body,
                Err(e) => {
                    yield StreamItem::Failed(e.to_string());
                    return;
                }
            };

            let mut lines = lines(body, read_timeout);
            let mut text = String::new();

            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        yield StreamItem::Failed(e.to_string());
                        return;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let data: Value = match serde_json::from_str(&line) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping undecodable Ollama line");
                        continue;
                    }
                };

                if let Some(error) = data.get("error") {
                    let message = error
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string());
                    yield StreamItem::Failed(
                        ProviderError::Vendor {
                            provider: PROVIDER,
                            message,
                        }
                        .to_string(),
                    );
                    return;
                }

                let message = &data["message"];
                // Reasoning models stream their thinking separately from the answer
                if let Some(thinking) = message.get("thinking").and_then(Value::as_str) {
                    if !thinking.is_empty() {
                        yield StreamItem::Delta(thinking.to_string());
                    }
                }
                if let Some(content) = message.get("content").and_then(Value::as_str) {
                    if !content.is_empty() {
                        text.push_str(content);
                        yield StreamItem::Delta(content.to_string());
                    }
                }

                let tool_calls = message
                    .get("tool_calls")
                    .and_then(Value::as_array)
                    .filter(|calls| !calls.is_empty());
                if let Some(tool_calls) = tool_calls {
                    for call in tool_calls {
                        yield StreamItem::ToolCall(tool_call_from_value(call));
                    }
                    yield StreamItem::Completed(Completion {
                        text,
                        reasoning: Vec::new(),
                        usage: get_usage(&data),
                    });
                    return;
                }

                if data.get("done").and_then(Value::as_bool) == Some(true) {
                    yield StreamItem::Completed(Completion {
                        text,
                        reasoning: Vec::new(),
                        usage: get_usage(&data),
                    });
                    return;
                }
            }

            yield StreamItem::Failed(ProviderError::UnexpectedEnd(PROVIDER).to_string());
        })
    }
}

fn tool_call_from_value(call: &Value) -> ToolCall {
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(generate_tool_call_id);
    let function = &call["function"];
    let name = function.get("name").and_then(Value::as_str).unwrap_or_default();
    let arguments = function.get("arguments").cloned().unwrap_or_else(|| json!({}));
    ToolCall::new(id, name, arguments)
}

fn get_usage(data: &Value) -> Option<Usage> {
    let input_tokens = data.get("prompt_eval_count").and_then(Value::as_u64);
    let output_tokens = data.get("eval_count").and_then(Value::as_u64);
    if input_tokens.is_none() && output_tokens.is_none() {
        return None;
    }
    Some(Usage::new(
        input_tokens.map(|v| v as u32),
        output_tokens.map(|v| v as u32),
        None,
    ))
}

/// Convert the transcript into Ollama chat messages.
///
/// Images must be inline base64; URL images are dropped. Every tool result
/// becomes its own `tool` message.
pub fn messages_to_ollama_spec(messages: &[Message]) -> Vec<Value> {
    let mut spec = Vec::new();

    for message in messages {
        let mut text = String::new();
        let mut images = Vec::new();
        let mut tool_calls = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(t) => text.push_str(&t.text),
                MessageContent::Image(image) => match &image.source {
                    MediaSource::Base64 { data, .. } => images.push(json!(data)),
                    MediaSource::Url { url } => {
                        tracing::debug!(%url, "Ollama only accepts inline images, dropping URL image");
                    }
                },
                MessageContent::ToolRequest(call) => tool_calls.push(json!({
                    "id": call.id,
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments_object(),
                    }
                })),
                MessageContent::ToolResponse(result) => spec.push(json!({
                    "role": "tool",
                    "content": result.output_text(),
                    "tool_call_id": result.tool_call_id,
                    "tool_name": result.name,
                })),
                MessageContent::Reasoning(_) => {}
            }
        }

        if text.is_empty() && images.is_empty() && tool_calls.is_empty() {
            continue;
        }
        let role = match message.role {
            Role::System => "system",
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        };
        let mut converted = json!({"role": role, "content": text});
        if !images.is_empty() {
            converted["images"] = json!(images);
        }
        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }
        spec.push(converted);
    }

    spec
}

/// Ollama takes OpenAI chat-completions style tool declarations
pub fn tools_to_ollama_spec(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema(),
                }
            })
        })
        .collect()
}
