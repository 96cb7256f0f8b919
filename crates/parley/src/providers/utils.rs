use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::RequestBuilder;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::role::Role;

/// One server-sent event frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// OpenAI-style `[DONE]` sentinel
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Await `future`, failing with `ProviderError::Timeout` if `limit` elapses first
pub async fn with_read_timeout<F, T>(limit: Option<Duration>, future: F) -> Result<T, ProviderError>
where
    F: Future<Output = T>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| ProviderError::Timeout(limit)),
        None => Ok(future.await),
    }
}

/// Send a streaming request and hand back the body as a byte stream.
///
/// Non-2xx responses become `ProviderError::Http` with the body text attached.
pub async fn send_streaming(
    request: RequestBuilder,
    provider: &'static str,
    read_timeout: Option<Duration>,
) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static, ProviderError> {
    let response = with_read_timeout(read_timeout, request.send()).await??;

    let status = response.status();
    if !status.is_success() {
        let body = with_read_timeout(read_timeout, response.text())
            .await?
            .unwrap_or_default();
        return Err(ProviderError::Http {
            provider,
            status: status.as_u16(),
            body,
        });
    }

    Ok(response.bytes_stream())
}

/// Split a byte stream into lines, tolerating `\r\n` and chunk boundaries that
/// fall inside a line or a multi-byte character.
///
/// A trailing line without a newline is still yielded at end of stream.
pub fn lines<S, E>(
    stream: S,
    read_timeout: Option<Duration>,
) -> BoxStream<'static, Result<String, ProviderError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut stream = Box::pin(stream);
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = match with_read_timeout(read_timeout, stream.next()).await {
                Ok(next) => next,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            match next {
                Some(Ok(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        yield Ok(decode_line(&line));
                    }
                }
                Some(Err(e)) => {
                    yield Err(ProviderError::Transport(e.to_string()));
                    return;
                }
                None => {
                    if !buffer.is_empty() {
                        yield Ok(decode_line(&buffer));
                    }
                    return;
                }
            }
        }
    })
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(&['\n', '\r'][..])
        .to_string()
}

/// Decode a byte stream as server-sent events.
///
/// Comment lines are skipped and multi-line `data:` fields are joined with `\n`.
pub fn sse_frames<S, E>(
    stream: S,
    read_timeout: Option<Duration>,
) -> BoxStream<'static, Result<SseFrame, ProviderError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut lines = lines(stream, read_timeout);
        let mut event: Option<String> = None;
        let mut data: Vec<String> = Vec::new();

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            if line.is_empty() {
                if !data.is_empty() || event.is_some() {
                    yield Ok(SseFrame {
                        event: event.take(),
                        data: data.join("\n"),
                    });
                    data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => event = Some(value.to_string()),
                "data" => data.push(value.to_string()),
                _ => {}
            }
        }

        if !data.is_empty() {
            yield Ok(SseFrame {
                event,
                data: data.join("\n"),
            });
        }
    })
}

/// Text of every system message, joined by blank lines. Vendors that take the
/// system prompt as a separate field use this.
pub fn system_text(messages: &[Message]) -> Option<String> {
    let parts: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.text())
        .filter(|t| !t.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Generated id for vendors that do not assign tool call ids
pub fn generate_tool_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}
