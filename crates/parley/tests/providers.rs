use futures::StreamExt;
use parley::{
    models::{
        message::Message,
        tool::{ToolCall, ToolDefinition, ToolResult},
    },
    providers::{
        base::{CompletionRequest, Provider, StreamItem},
        configs::{ProviderConfig, RequestOptions},
        factory::{get_provider, ProviderType},
    },
};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Generic test harness for any Provider implementation
struct ProviderTester {
    provider: Arc<dyn Provider>,
    model: &'static str,
    server: MockServer,
}

impl ProviderTester {
    /// Serve `body` for every POST and point a provider of `provider_type` at it
    async fn new(
        provider_type: ProviderType,
        model: &'static str,
        body: String,
        content_type: &str,
    ) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(".*"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
            .mount(&server)
            .await;

        let config = ProviderConfig::new(
            provider_type,
            Some(server.uri()),
            Some("test_api_key".to_string()),
        )
        .unwrap();
        Self {
            provider: get_provider(config).unwrap(),
            model,
            server,
        }
    }

    async fn run(&self, tools: &[ToolDefinition]) -> Vec<StreamItem> {
        let messages = vec![
            Message::system().with_text("You are a helpful assistant."),
            Message::user().with_text("What's the weather in San Francisco?"),
        ];
        self.run_messages(&messages, tools).await
    }

    async fn run_messages(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Vec<StreamItem> {
        let options = RequestOptions::default();
        self.provider
            .stream(CompletionRequest {
                model: self.model,
                messages,
                tools,
                options: &options,
            })
            .collect()
            .await
    }

    async fn test_basic_response(&self) {
        let items = self.run(&[]).await;
        let deltas: String = items
            .iter()
            .filter_map(|item| match item {
                StreamItem::Delta(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();

        assert_eq!(deltas, "Hello!");
        match items.last() {
            Some(StreamItem::Completed(completion)) => assert_eq!(completion.text, "Hello!"),
            other => panic!("expected a completion, got {:?}", other),
        }
        let terminals = items
            .iter()
            .filter(|item| matches!(item, StreamItem::Completed(_) | StreamItem::Failed(_)))
            .count();
        assert_eq!(terminals, 1, "stream must end with exactly one terminator");
    }

    /// A tool call and its result sent back to the vendor keep the call id on both sides
    async fn test_tool_call_id_round_trip(&self) {
        let call = ToolCall::new("call_42", "get_weather", json!({"location": "Paris"}));
        let messages = vec![
            Message::user().with_text("Weather in Paris?"),
            Message::assistant().with_tool_request(call.clone()),
            Message::tool().with_tool_response(ToolResult::success(&call, json!("sunny"))),
        ];
        self.run_messages(&messages, &[]).await;

        let requests = self.server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests.last().unwrap().body).unwrap();
        assert_eq!(
            count_strings(&body, "call_42"),
            2,
            "call id must appear on the call and on its result: {}",
            body
        );
    }

    async fn test_tool_usage(&self) {
        let weather_tool = ToolDefinition::new("get_weather", "Get the weather for a location");
        let items = self.run(&[weather_tool]).await;

        let calls: Vec<_> = items
            .iter()
            .filter_map(|item| match item {
                StreamItem::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 1, "expected exactly one tool call");
        assert_eq!(calls[0].name, "get_weather");
        assert!(!calls[0].id.is_empty());
        assert_eq!(
            calls[0].parsed_arguments().unwrap()["location"],
            json!("San Francisco, CA")
        );
        assert!(matches!(items.last(), Some(StreamItem::Completed(_))));
    }
}

fn count_strings(value: &Value, needle: &str) -> usize {
    match value {
        Value::String(s) => usize::from(s == needle),
        Value::Array(items) => items.iter().map(|v| count_strings(v, needle)).sum(),
        Value::Object(map) => map.values().map(|v| count_strings(v, needle)).sum(),
        _ => 0,
    }
}

fn sse(events: &[serde_json::Value]) -> String {
    events.iter().map(|e| format!("data: {}\n\n", e)).collect()
}

#[tokio::test]
async fn test_openai_provider() {
    let text = sse(&[
        json!({"type": "response.output_text.delta", "delta": "Hello!"}),
        json!({"type": "response.completed", "response": {"output": [
            {"type": "message", "content": [{"type": "output_text", "text": "Hello!"}]}
        ]}}),
    ]);
    let tester =
        ProviderTester::new(ProviderType::OpenAi, "gpt-4o", text, "text/event-stream").await;
    tester.test_basic_response().await;
    tester.test_tool_call_id_round_trip().await;

    let tool = sse(&[json!({"type": "response.completed", "response": {"output": [
        {"type": "function_call", "call_id": "call_1", "name": "get_weather",
         "arguments": "{\"location\":\"San Francisco, CA\"}"}
    ]}})]);
    ProviderTester::new(ProviderType::OpenAi, "gpt-4o", tool, "text/event-stream")
        .await
        .test_tool_usage()
        .await;
}

#[tokio::test]
async fn test_anthropic_provider() {
    let text = sse(&[
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello!"}}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}}),
        json!({"type": "message_stop"}),
    ]);
    let tester = ProviderTester::new(
        ProviderType::Anthropic,
        "claude-sonnet-4",
        text,
        "text/event-stream",
    )
    .await;
    tester.test_basic_response().await;
    tester.test_tool_call_id_round_trip().await;

    let tool = sse(&[
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"location\":"}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "\"San Francisco, CA\"}"}}),
        json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
    ]);
    ProviderTester::new(ProviderType::Anthropic, "claude-sonnet-4", tool, "text/event-stream")
        .await
        .test_tool_usage()
        .await;
}

#[tokio::test]
async fn test_gemini_provider() {
    let text = sse(&[json!({"candidates": [{
        "content": {"role": "model", "parts": [{"text": "Hello!"}]},
        "finishReason": "STOP"
    }]})]);
    let tester = ProviderTester::new(
        ProviderType::Gemini,
        "gemini-2.5-flash",
        text,
        "text/event-stream",
    )
    .await;
    tester.test_basic_response().await;
    tester.test_tool_call_id_round_trip().await;

    let tool = sse(&[json!({"candidates": [{
        "content": {"role": "model", "parts": [
            {"functionCall": {"name": "get_weather", "args": {"location": "San Francisco, CA"}}}
        ]},
        "finishReason": "STOP"
    }]})]);
    ProviderTester::new(ProviderType::Gemini, "gemini-2.5-flash", tool, "text/event-stream")
        .await
        .test_tool_usage()
        .await;
}

#[tokio::test]
async fn test_ollama_provider() {
    let text = [
        json!({"message": {"role": "assistant", "content": "Hello!"}, "done": false}),
        json!({"message": {"role": "assistant", "content": ""}, "done": true}),
    ]
    .iter()
    .map(|line| format!("{}\n", line))
    .collect::<String>();
    let tester =
        ProviderTester::new(ProviderType::Ollama, "qwen3:8b", text, "application/x-ndjson").await;
    tester.test_basic_response().await;
    tester.test_tool_call_id_round_trip().await;

    let tool = format!(
        "{}\n",
        json!({"message": {"role": "assistant", "content": "", "tool_calls": [
            {"function": {"name": "get_weather", "arguments": {"location": "San Francisco, CA"}}}
        ]}, "done": false})
    );
    ProviderTester::new(ProviderType::Ollama, "qwen3:8b", tool, "application/x-ndjson")
        .await
        .test_tool_usage()
        .await;
}
