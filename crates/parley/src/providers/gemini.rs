use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::base::{Completion, CompletionRequest, Provider, ProviderStream, StreamItem, Usage};
use super::configs::GeminiProviderConfig;
use super::factory::ProviderType;
use super::utils::{generate_tool_call_id, send_streaming, sse_frames, system_text};
use crate::errors::{ConfigError, ProviderError};
use crate::models::content::MediaSource;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{ToolCall, ToolDefinition};

pub const GEMINI_HOST: &str = "https://generativelanguage.googleapis.com";
const PROVIDER: &str = "Gemini";

pub struct GeminiProvider {
    client: Client,
    config: GeminiProviderConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiProviderConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, request: &CompletionRequest<'_>) -> Value {
        let mut payload = json!({
            "contents": messages_to_gemini_spec(request.messages),
        });

        if let Some(system) = system_text(request.messages) {
            payload["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !request.tools.is_empty() {
            payload["tools"] = json!([{
                "functionDeclarations": tools_to_gemini_spec(request.tools),
            }]);
        }

        let mut generation_config = Map::new();
        if let Some(temperature) = request.options.temperature {
            generation_config.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_output_tokens) = request.options.max_output_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(max_output_tokens));
        }
        if !generation_config.is_empty() {
            payload["generationConfig"] = Value::Object(generation_config);
        }

        payload
    }
}

impl Provider for GeminiProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Gemini
    }

    fn stream<'a>(&'a self, request: CompletionRequest<'a>) -> ProviderStream<'a> {
        Box::pin(async_stream::stream! {
            let url = format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.config.host.trim_end_matches('/'),
                request.model
            );
            let payload = self.build_payload(&request);
            let read_timeout = request.options.read_timeout;

            let builder = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.config.api_key)
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
            let mut usage = None;
            let mut saw_calls = false;

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
                        tracing::debug!(error = %e, "skipping undecodable Gemini frame");
                        continue;
                    }
                };

                if let Some(error) = data.get("error") {
                    let message = error["message"].as_str().unwrap_or("unknown error");
                    yield StreamItem::Failed(vendor_error(message));
                    return;
                }
                if data.get("usageMetadata").is_some() {
                    usage = get_usage(&data["usageMetadata"]);
                }

                let candidate = &data["candidates"][0];
                if candidate.is_null() {
                    if let Some(reason) = data["promptFeedback"]["blockReason"].as_str() {
                        yield StreamItem::Failed(vendor_error(&format!("prompt blocked: {}", reason)));
                        return;
                    }
                    continue;
                }

                for part in candidate["content"]["parts"].as_array().into_iter().flatten() {
                    if let Some(call) = part.get("functionCall") {
                        let id = call
                            .get("id")
                            .and_then(Value::as_str)
                            .filter(|id| !id.is_empty())
                            .map(str::to_string)
                            .unwrap_or_else(generate_tool_call_id);
                        let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                        let arguments = call.get("args").cloned().unwrap_or_else(|| json!({}));
                        saw_calls = true;
                        yield StreamItem::ToolCall(ToolCall::new(id, name, arguments));
                    } else if let Some(chunk) = part.get("text").and_then(Value::as_str) {
                        if chunk.is_empty() {
                            continue;
                        }
                        // Thought summaries are shown but never become answer text
                        if part.get("thought").and_then(Value::as_bool) != Some(true) {
                            text.push_str(chunk);
                        }
                        yield StreamItem::Delta(chunk.to_string());
                    }
                }

                if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
                    // Requested calls always get executed, whatever stopped generation
                    match reason {
                        _ if saw_calls => {
                            yield StreamItem::Completed(Completion {
                                text,
                                reasoning: Vec::new(),
                                usage,
                            });
                        }
                        "STOP" | "MAX_TOKENS" | "FINISH_REASON_UNSPECIFIED" => {
                            yield StreamItem::Completed(Completion {
                                text,
                                reasoning: Vec::new(),
                                usage,
                            });
                        }
                        other => {
                            yield StreamItem::Failed(vendor_error(&format!(
                                "generation stopped: {}",
                                other
                            )));
                        }
                    }
                    return;
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

fn get_usage(metadata: &Value) -> Option<Usage> {
    let count = |key: &str| metadata.get(key).and_then(Value::as_u64).map(|v| v as u32);
    Some(Usage::new(
        count("promptTokenCount"),
        count("candidatesTokenCount"),
        count("totalTokenCount"),
    ))
}

/// Convert the transcript into Gemini `contents`.
///
/// Assistant turns use the `model` role and tool results are sent back as
/// `functionResponse` parts in a user turn. Adjacent turns with the same role
/// are merged.
pub fn messages_to_gemini_spec(messages: &[Message]) -> Vec<Value> {
    let mut contents: Vec<Value> = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::System => continue,
            Role::Assistant => "model",
            Role::User | Role::Tool => "user",
        };

        let mut parts = Vec::new();
        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        parts.push(json!({"text": text.text}));
                    }
                }
                MessageContent::Image(image) => match &image.source {
                    MediaSource::Base64 { media_type, data } => parts.push(json!({
                        "inlineData": {"mimeType": media_type, "data": data},
                    })),
                    MediaSource::Url { url } => parts.push(json!({
                        "fileData": {"mimeType": guess_image_mime_type(url), "fileUri": url},
                    })),
                },
                MessageContent::ToolRequest(call) => {
                    parts.push(json!({
                        "functionCall": {
                            "id": call.id,
                            "name": call.name,
                            "args": call.arguments_object(),
                        }
                    }));
                }
                MessageContent::ToolResponse(result) => {
                    let response = if result.is_error {
                        result.output.clone()
                    } else {
                        json!({"result": result.output})
                    };
                    parts.push(json!({
                        "functionResponse": {
                            "id": result.tool_call_id,
                            "name": result.name,
                            "response": response,
                        }
                    }));
                }
                MessageContent::Reasoning(_) => {}
            }
        }
        if parts.is_empty() {
            continue;
        }

        match contents.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(existing) = last["parts"].as_array_mut() {
                    existing.extend(parts);
                }
            }
            _ => contents.push(json!({"role": role, "parts": parts})),
        }
    }

    contents
}

fn guess_image_mime_type(url: &str) -> &'static str {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or_default().to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Function declarations; parameter-less tools omit `parameters` entirely
pub fn tools_to_gemini_spec(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let mut declaration = json!({
                "name": tool.name,
                "description": tool.description,
            });
            if !tool.parameters.is_empty() {
                declaration["parameters"] = tool.input_schema();
            }
            declaration
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::{ParameterSpec, ParameterType, ToolResult};
    use crate::providers::configs::RequestOptions;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(chunks: &[Value]) -> String {
        chunks.iter().map(|c| format!("data: {}\r\n\r\n", c)).collect()
    }

    async fn setup_mock_server(status: u16, body: String) -> (MockServer, GeminiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "test_api_key"))
            .respond_with(ResponseTemplate::new(status).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let config = GeminiProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
        };
        let provider = GeminiProvider::new(config).unwrap();
        (mock_server, provider)
    }

    async fn collect(provider: &GeminiProvider) -> Vec<StreamItem> {
        let messages = vec![Message::user().with_text("Hi")];
        let options = RequestOptions::default();
        provider
            .stream(CompletionRequest {
                model: "gemini-2.5-flash",
                messages: &messages,
                tools: &[],
                options: &options,
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_text_stream() {
        let body = sse(&[
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "lo"}]}, "finishReason": "STOP"}],
                   "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}}),
        ]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let items = collect(&provider).await;
        assert_eq!(
            items,
            vec![
                StreamItem::Delta("Hel".to_string()),
                StreamItem::Delta("lo".to_string()),
                StreamItem::Completed(Completion {
                    text: "Hello".to_string(),
                    reasoning: Vec::new(),
                    usage: Some(Usage::new(Some(3), Some(2), Some(5))),
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_function_call_gets_generated_id() {
        let body = sse(&[json!({"candidates": [{
            "content": {"role": "model", "parts": [
                {"functionCall": {"name": "add", "args": {"a": 1, "b": 2}}},
                {"functionCall": {"id": "fc_2", "name": "now", "args": {}}}
            ]},
            "finishReason": "STOP"
        }]})]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let items = collect(&provider).await;
        assert_eq!(items.len(), 3);
        match &items[0] {
            StreamItem::ToolCall(call) => {
                assert!(call.id.starts_with("call_"));
                assert_eq!(call.name, "add");
                assert_eq!(call.arguments, json!({"a": 1, "b": 2}));
            }
            other => panic!("unexpected item {:?}", other),
        }
        assert!(matches!(&items[1], StreamItem::ToolCall(call) if call.id == "fc_2"));
        assert!(matches!(&items[2], StreamItem::Completed(_)));
    }

    #[tokio::test]
    async fn test_function_call_completes_on_any_finish_reason() {
        let body = sse(&[json!({"candidates": [{
            "content": {"role": "model", "parts": [{"functionCall": {"name": "now", "args": {}}}]},
            "finishReason": "OTHER"
        }]})]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let items = collect(&provider).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], StreamItem::ToolCall(call) if call.name == "now"));
        assert!(matches!(&items[1], StreamItem::Completed(_)));
    }

    #[tokio::test]
    async fn test_abnormal_finish_reason_without_calls_fails() {
        let body = sse(&[json!({"candidates": [{
            "content": {"role": "model", "parts": [{"text": "partial"}]},
            "finishReason": "SAFETY"
        }]})]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let items = collect(&provider).await;
        assert_eq!(items[0], StreamItem::Delta("partial".to_string()));
        assert_eq!(
            items[1],
            StreamItem::Failed("Gemini error: generation stopped: SAFETY".to_string())
        );
    }

    #[tokio::test]
    async fn test_thoughts_are_relayed_but_not_kept() {
        let body = sse(&[json!({"candidates": [{
            "content": {"parts": [{"text": "pondering", "thought": true}, {"text": "42"}]},
            "finishReason": "STOP"
        }]})]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let items = collect(&provider).await;
        assert_eq!(items[0], StreamItem::Delta("pondering".to_string()));
        assert!(matches!(&items[2], StreamItem::Completed(c) if c.text == "42"));
    }

    #[tokio::test]
    async fn test_error_object() {
        let body = sse(&[json!({"error": {"code": 429, "message": "Resource exhausted"}})]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let items = collect(&provider).await;
        assert_eq!(
            items,
            vec![StreamItem::Failed("Gemini error: Resource exhausted".to_string())]
        );
    }

    #[tokio::test]
    async fn test_eof_without_finish_reason() {
        let body = sse(&[json!({"candidates": [{"content": {"parts": [{"text": "Hi"}]}}]})]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let items = collect(&provider).await;
        assert_eq!(
            items.last(),
            Some(&StreamItem::Failed("Gemini stream ended unexpectedly".to_string()))
        );
    }

    #[tokio::test]
    async fn test_http_error() {
        let (_server, provider) = setup_mock_server(500, "internal".to_string()).await;

        let items = collect(&provider).await;
        assert_eq!(
            items,
            vec![StreamItem::Failed(
                "Gemini request failed with status 500: internal".to_string()
            )]
        );
    }

    #[test]
    fn test_payload() {
        let provider = GeminiProvider::new(GeminiProviderConfig {
            host: GEMINI_HOST.to_string(),
            api_key: "k".to_string(),
        })
        .unwrap();
        let messages = vec![
            Message::system().with_text("Be terse."),
            Message::user().with_text("Hi"),
        ];
        let tools = vec![
            ToolDefinition::new("now", "Current time"),
            ToolDefinition::new("add", "Add")
                .with_parameter(ParameterSpec::new("a", "a", ParameterType::Number).required()),
        ];
        let options = RequestOptions::default().with_max_output_tokens(100);
        let payload = provider.build_payload(&CompletionRequest {
            model: "gemini-2.5-flash",
            messages: &messages,
            tools: &tools,
            options: &options,
        });

        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "Be terse.");
        assert_eq!(payload["contents"].as_array().unwrap().len(), 1);
        assert_eq!(payload["generationConfig"], json!({"maxOutputTokens": 100}));
        let declarations = &payload["tools"][0]["functionDeclarations"];
        assert!(declarations[0].get("parameters").is_none());
        assert_eq!(declarations[1]["parameters"]["required"], json!(["a"]));
    }

    #[test]
    fn test_tool_round_trip_contents() {
        let call = ToolCall::new("call_1", "add", json!({"a": 1}));
        let messages = vec![
            Message::user().with_text("add"),
            Message::assistant().with_tool_request(call.clone()),
            Message::tool().with_tool_response(ToolResult::success(&call, json!(1))),
        ];

        let contents = messages_to_gemini_spec(&messages);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["args"], json!({"a": 1}));
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"],
            json!({"id": "call_1", "name": "add", "response": {"result": 1}})
        );
    }

    #[test]
    fn test_url_images_use_file_data() {
        let messages = vec![Message::user().with_image(MediaSource::Url {
            url: "https://example.com/cat.PNG?size=large".to_string(),
        })];
        let contents = messages_to_gemini_spec(&messages);
        assert_eq!(
            contents[0]["parts"][0]["fileData"]["mimeType"],
            "image/png"
        );
    }
}
