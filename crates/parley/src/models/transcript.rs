use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::MediaSource;
use super::message::{Message, MessageContent};
use super::role::Role;

/// Canonical, vendor-neutral conversation history.
///
/// Insertion order is conversation order. The conversation loop only ever
/// appends to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Messages without content are ignored.
    pub fn push(&mut self, message: Message) {
        if message.is_empty() {
            tracing::debug!(role = ?message.role, "skipping empty message");
            return;
        }
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Build a transcript from caller-supplied history plus the current user turn.
    ///
    /// History entries are `{role, content}` objects where content is a string or
    /// a list of `text` / `image` blocks. Entries with an unknown role or no usable
    /// content are dropped. The current turn is appended unless it is empty or
    /// repeats the last user message exactly.
    pub fn from_history(history: &[Value], message: &str, attachments: &[Value]) -> Self {
        let mut transcript = Transcript::new();

        for item in history {
            let Some(role) = item.get("role").and_then(Value::as_str).and_then(Role::parse) else {
                continue;
            };
            if role == Role::Tool {
                continue;
            }
            let Some(content) = item.get("content").and_then(content_from_value) else {
                continue;
            };
            transcript.push(Message {
                content,
                ..Message::new(role)
            });
        }

        let mut current = Vec::new();
        let text = message.trim();
        if !text.is_empty() {
            current.push(MessageContent::text(text));
        }
        current.extend(attachments.iter().filter_map(parse_attachment));
        if current.is_empty() {
            return transcript;
        }

        let duplicate = transcript
            .last()
            .map(|last| last.role == Role::User && last.content == current)
            .unwrap_or(false);
        if !duplicate {
            transcript.push(Message {
                content: current,
                ..Message::user()
            });
        }

        transcript
    }
}

impl From<Vec<Message>> for Transcript {
    fn from(messages: Vec<Message>) -> Self {
        let mut transcript = Transcript::new();
        for message in messages {
            transcript.push(message);
        }
        transcript
    }
}

fn content_from_value(content: &Value) -> Option<Vec<MessageContent>> {
    let blocks = match content {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            vec![MessageContent::text(trimmed)]
        }
        Value::Array(items) => items
            .iter()
            .filter_map(|block| {
                let block_type = block.get("type").and_then(Value::as_str)?;
                match block_type.trim().to_ascii_lowercase().as_str() {
                    "text" | "input_text" => {
                        let text = block.get("text").and_then(Value::as_str)?;
                        if text.trim().is_empty() {
                            None
                        } else {
                            Some(MessageContent::text(text))
                        }
                    }
                    _ => parse_attachment(block),
                }
            })
            .collect(),
        _ => return None,
    };

    if blocks.is_empty() {
        None
    } else {
        Some(blocks)
    }
}

/// Parse an `{type: "image", source: {...}}` attachment block
pub fn parse_attachment(block: &Value) -> Option<MessageContent> {
    let block_type = block.get("type").and_then(Value::as_str)?;
    if block_type.trim().to_ascii_lowercase() != "image" {
        return None;
    }
    let source = block.get("source")?;
    let source_type = source.get("type").and_then(Value::as_str)?;

    match source_type.trim().to_ascii_lowercase().as_str() {
        "url" => {
            let url = source.get("url").and_then(Value::as_str)?.trim();
            if url.is_empty() {
                return None;
            }
            Some(MessageContent::image(MediaSource::Url {
                url: url.to_string(),
            }))
        }
        "base64" => {
            let data = source.get("data").and_then(Value::as_str)?.trim();
            let media_type = source
                .get("media_type")
                .and_then(Value::as_str)?
                .trim()
                .to_ascii_lowercase();
            if data.is_empty() || !media_type.starts_with("image/") {
                return None;
            }
            Some(MessageContent::image(MediaSource::Base64 {
                media_type,
                data: data.to_string(),
            }))
        }
        _ => None,
    }
}
