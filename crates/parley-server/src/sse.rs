//! Server-sent event framing for conversation runs.
//!
//! Every normalized event becomes one `frame` event whose data is
//! `{seq, ts, thread_id, run_id, iteration, stage, type, payload}`.

use axum::{
    http::{self, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use parley::events::{AgentEvent, EventEnvelope};
use serde_json::{json, Map, Value};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio_stream::wrappers::ReceiverStream;

const MAX_DEPTH: usize = 5;
const MAX_STRING_CHARS: usize = 800;
const MAX_LIST_ITEMS: usize = 20;
const MAX_MAP_KEYS: usize = 30;
const TRUNCATED: &str = "[truncated]";

/// Envelope fields that are lifted into the frame instead of the payload
const ENVELOPE_KEYS: [&str; 4] = ["type", "run_id", "iteration", "timestamp"];

/// Streaming body fed by a channel of already encoded events
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    pub fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .header("X-Accel-Buffering", "no")
            .body(body)
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build event stream response: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            })
    }
}

/// Encode one server-sent event
pub fn encode_sse(event_name: &str, payload: &Value) -> String {
    format!("event: {}\ndata: {}\n\n", event_name, payload)
}

/// How much of each payload is kept in trace frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceLevel {
    #[default]
    Minimal,
    Full,
}

impl TraceLevel {
    /// Anything other than `full` (case-insensitive) is minimal
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("full") => TraceLevel::Full,
            _ => TraceLevel::Minimal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TraceLevel::Minimal => "minimal",
            TraceLevel::Full => "full",
        }
    }
}

/// Pipeline stage a frame type belongs to
pub fn stage_for(event_type: &str) -> &'static str {
    match event_type {
        "token_delta" | "final_message" => "model",
        "tool_call" | "tool_result" => "tool",
        "error" | "done" => "stream",
        _ => "agent",
    }
}

/// Bound a payload for transport. `full` passes it through untouched.
pub fn sanitize(value: Value, level: TraceLevel) -> Value {
    match level {
        TraceLevel::Full => value,
        TraceLevel::Minimal => sanitize_at(value, 0),
    }
}

fn sanitize_at(value: Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return json!(TRUNCATED);
    }

    match value {
        Value::String(text) => {
            if text.chars().count() <= MAX_STRING_CHARS {
                Value::String(text)
            } else {
                let head: String = text.chars().take(MAX_STRING_CHARS).collect();
                Value::String(format!("{}... {}", head, TRUNCATED))
            }
        }
        Value::Array(items) => {
            let overflow = items.len() > MAX_LIST_ITEMS;
            let mut sanitized: Vec<Value> = items
                .into_iter()
                .take(MAX_LIST_ITEMS)
                .map(|item| sanitize_at(item, depth + 1))
                .collect();
            if overflow {
                sanitized.push(json!(TRUNCATED));
            }
            Value::Array(sanitized)
        }
        Value::Object(map) => {
            let overflow = map.len() > MAX_MAP_KEYS;
            let mut sanitized: Map<String, Value> = map
                .into_iter()
                .take(MAX_MAP_KEYS)
                .map(|(key, inner)| (key, sanitize_at(inner, depth + 1)))
                .collect();
            if overflow {
                sanitized.insert("__truncated__".to_string(), json!(true));
            }
            Value::Object(sanitized)
        }
        other => other,
    }
}

/// Payload of the error event that ends a broken stream
pub fn stream_failed(message: &str) -> Value {
    json!({
        "code": "stream_failed",
        "message": message,
    })
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Rough token accounting reported in the closing `done` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageCounter {
    prompt_tokens: u64,
    completion_tokens: u64,
    completion_chars: u64,
}

impl UsageCounter {
    pub fn new(message: &str) -> Self {
        Self {
            prompt_tokens: word_count(message).max(1),
            completion_tokens: 0,
            completion_chars: 0,
        }
    }

    /// Every delta counts as at least one token
    pub fn record_delta(&mut self, delta: &str) {
        self.completion_chars += delta.chars().count() as u64;
        self.completion_tokens += word_count(delta).max(1);
    }

    pub fn to_json(&self) -> Value {
        json!({
            "prompt_tokens": self.prompt_tokens,
            "completion_tokens": self.completion_tokens,
            "completion_chars": self.completion_chars,
        })
    }
}

/// Builds the numbered frames of one chat stream and keeps its usage counters
#[derive(Debug)]
pub struct FrameWriter {
    thread_id: String,
    trace_level: TraceLevel,
    seq: u64,
    usage: UsageCounter,
}

impl FrameWriter {
    pub fn new<S: Into<String>>(thread_id: S, trace_level: TraceLevel, message: &str) -> Self {
        Self {
            thread_id: thread_id.into(),
            trace_level,
            seq: 0,
            usage: UsageCounter::new(message),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn started(&mut self, model: &str) -> String {
        let started_at = Utc::now().timestamp_millis();
        let payload = json!({
            "model": model,
            "started_at": started_at,
            "trace_level": self.trace_level.as_str(),
        });
        self.frame("stream_started", payload, "", 0, started_at)
    }

    pub fn event(&mut self, envelope: &EventEnvelope) -> String {
        let kind = envelope.event.kind();

        if let AgentEvent::TokenDelta { delta } = &envelope.event {
            self.usage.record_delta(delta);
        }

        let mut payload = serde_json::to_value(envelope).unwrap_or_default();
        if let Value::Object(map) = &mut payload {
            for key in ENVELOPE_KEYS {
                map.remove(key);
            }
        }
        let payload = sanitize(payload, self.trace_level);

        self.frame(
            kind,
            payload,
            &envelope.run_id,
            envelope.iteration,
            envelope.timestamp,
        )
    }

    pub fn done(&mut self) -> String {
        let finished_at = Utc::now().timestamp_millis();
        let payload = json!({
            "finished_at": finished_at,
            "usage": self.usage.to_json(),
        });
        self.frame("done", payload, "", 0, finished_at)
    }

    /// Frame for a stream that could not be set up or broke down
    pub fn failed(&mut self, message: &str) -> String {
        self.frame(
            "error",
            stream_failed(message),
            "",
            0,
            Utc::now().timestamp_millis(),
        )
    }

    fn frame(
        &mut self,
        event_type: &str,
        payload: Value,
        run_id: &str,
        iteration: usize,
        ts: i64,
    ) -> String {
        self.seq += 1;
        let frame = json!({
            "seq": self.seq,
            "ts": ts,
            "thread_id": self.thread_id,
            "run_id": run_id,
            "iteration": iteration,
            "stage": stage_for(event_type),
            "type": event_type,
            "payload": payload,
        });
        encode_sse("frame", &frame)
    }
}
