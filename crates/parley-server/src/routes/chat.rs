use crate::sse::{encode_sse, stream_failed, FrameWriter, SseResponse, TraceLevel, UsageCounter};
use crate::state::{AppState, ChatOptions};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use futures::StreamExt;
use parley::agent::Agent;
use parley::bridge::spawn_reply;
use parley::errors::ConfigError;
use parley::models::transcript::{parse_attachment, Transcript};
use parley::providers::factory::ModelSelection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Default, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    history: Vec<Value>,
    #[serde(default)]
    attachments: Vec<Value>,
    #[serde(default, alias = "threadId")]
    thread_id: Option<String>,
    #[serde(default)]
    trace_level: Option<String>,
    #[serde(default)]
    options: ChatOptions,
}

impl ChatRequest {
    fn thread_id(&self) -> String {
        self.thread_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("thread-{}", Utc::now().timestamp_millis()))
    }

    fn trace_level(&self) -> TraceLevel {
        let raw = self
            .trace_level
            .as_deref()
            .filter(|level| !level.is_empty())
            .or(self.options.trace_level.as_deref());
        TraceLevel::parse(raw)
    }
}

fn invalid_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": {
                "code": "invalid_request",
                "message": message,
            }
        })),
    )
        .into_response()
}

/// A validated chat request, ready to run
struct PreparedChat {
    message: String,
    thread_id: String,
    setup: Result<(Agent, ModelSelection), ConfigError>,
    transcript: Transcript,
}

impl ChatRequest {
    /// Reject requests with neither a message nor a usable attachment, then
    /// resolve the agent and build the transcript
    fn prepare(&self, state: &AppState) -> Result<PreparedChat, Response> {
        let message = self.message.trim().to_string();
        let attachments: Vec<Value> = self
            .attachments
            .iter()
            .filter(|block| parse_attachment(block).is_some())
            .cloned()
            .collect();
        if message.is_empty() && attachments.is_empty() {
            return Err(invalid_request("message or attachments is required"));
        }

        Ok(PreparedChat {
            thread_id: self.thread_id(),
            setup: state.build_agent(&self.options),
            transcript: Transcript::from_history(&self.history, &message, &attachments),
            message,
        })
    }
}

async fn handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let chat = match request.prepare(&state) {
        Ok(chat) => chat,
        Err(response) => return response,
    };
    let mut writer = FrameWriter::new(chat.thread_id, request.trace_level(), &chat.message);

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        let (agent, selection) = match chat.setup {
            Ok(built) => built,
            Err(e) => {
                let thread_id = writer.thread_id();
                tracing::warn!(%thread_id, "Failed to set up chat stream: {}", e);
                let _ = tx.send(writer.failed(&e.to_string())).await;
                return;
            }
        };

        tracing::info!(
            thread_id = %writer.thread_id(),
            provider = %selection.provider,
            model = %selection.model,
            "chat stream started"
        );
        if tx.send(writer.started(&selection.model)).await.is_err() {
            return;
        }

        let mut events = spawn_reply(agent, chat.transcript);
        loop {
            match timeout(Duration::from_millis(500), events.next()).await {
                Ok(Some(envelope)) => {
                    if let Err(e) = tx.send(writer.event(&envelope)).await {
                        tracing::debug!("Client went away, dropping chat stream: {}", e);
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    // Heartbeat, used to detect disconnected clients
                    if tx.is_closed() {
                        tracing::debug!(run_id = %events.run_id(), "Client went away during run");
                        return;
                    }
                    continue;
                }
            }
        }

        let _ = tx.send(writer.done()).await;
    });

    SseResponse::new(ReceiverStream::new(rx)).into_response()
}

/// Plain text variant: `meta`, one `token` per delta, then `done`. A failed
/// run ends with a single `error` event instead of `done`.
async fn text_handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let chat = match request.prepare(&state) {
        Ok(chat) => chat,
        Err(response) => return response,
    };

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        let thread_id = chat.thread_id;
        let (agent, selection) = match chat.setup {
            Ok(built) => built,
            Err(e) => {
                tracing::warn!(%thread_id, "Failed to set up chat stream: {}", e);
                let _ = tx.send(encode_sse("error", &stream_failed(&e.to_string()))).await;
                return;
            }
        };

        let meta = json!({
            "thread_id": thread_id,
            "model": selection.model,
            "started_at": Utc::now().timestamp_millis(),
        });
        if tx.send(encode_sse("meta", &meta)).await.is_err() {
            return;
        }

        let mut usage = UsageCounter::new(&chat.message);
        let mut text = spawn_reply(agent, chat.transcript).into_text_stream();
        loop {
            match timeout(Duration::from_millis(500), text.next()).await {
                Ok(Some(Ok(delta))) => {
                    usage.record_delta(&delta);
                    let token = encode_sse("token", &json!({"delta": delta}));
                    if let Err(e) = tx.send(token).await {
                        tracing::debug!("Client went away, dropping chat stream: {}", e);
                        return;
                    }
                }
                Ok(Some(Err(e))) => {
                    let _ = tx.send(encode_sse("error", &stream_failed(&e.to_string()))).await;
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    // Heartbeat, used to detect disconnected clients
                    if tx.is_closed() {
                        return;
                    }
                    continue;
                }
            }
        }

        let done = json!({
            "thread_id": thread_id,
            "finished_at": Utc::now().timestamp_millis(),
            "usage": usage.to_json(),
        });
        let _ = tx.send(encode_sse("done", &done)).await;
    });

    SseResponse::new(ReceiverStream::new(rx)).into_response()
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat/stream", post(handler))
        .route("/chat/stream/text", post(text_handler))
        .with_state(state)
}
