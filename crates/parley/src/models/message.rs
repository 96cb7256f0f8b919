use super::content::{ImageContent, MediaSource, ReasoningContent, TextContent};
use super::role::Role;
use super::tool::{ToolCall, ToolResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Content passed inside a message, which can be both simple content and tool content
pub enum MessageContent {
    Text(TextContent),
    Image(ImageContent),
    ToolRequest(ToolCall),
    ToolResponse(ToolResult),
    Reasoning(ReasoningContent),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(TextContent { text: text.into() })
    }

    pub fn image(source: MediaSource) -> Self {
        MessageContent::Image(ImageContent { source })
    }

    pub fn tool_request(tool_call: ToolCall) -> Self {
        MessageContent::ToolRequest(tool_call)
    }

    pub fn tool_response(result: ToolResult) -> Self {
        MessageContent::ToolResponse(result)
    }

    pub fn as_tool_request(&self) -> Option<&ToolCall> {
        if let MessageContent::ToolRequest(ref tool_call) = self {
            Some(tool_call)
        } else {
            None
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResult> {
        if let MessageContent::ToolResponse(ref result) = self {
            Some(result)
        } else {
            None
        }
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new system message with the current timestamp
    pub fn system() -> Self {
        Self::new(Role::System)
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Self::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// Create a new tool message with the current timestamp
    pub fn tool() -> Self {
        Self::new(Role::Tool)
    }

    /// Add any MessageContent to the message
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    /// Add image content to the message
    pub fn with_image(self, source: MediaSource) -> Self {
        self.with_content(MessageContent::image(source))
    }

    /// Add a tool request to the message
    pub fn with_tool_request(self, tool_call: ToolCall) -> Self {
        self.with_content(MessageContent::tool_request(tool_call))
    }

    /// Add a tool response to the message
    pub fn with_tool_response(self, result: ToolResult) -> Self {
        self.with_content(MessageContent::tool_response(result))
    }

    pub fn with_reasoning(self, reasoning: ReasoningContent) -> Self {
        self.with_content(MessageContent::Reasoning(reasoning))
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|c| c.as_tool_request())
    }

    pub fn tool_responses(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(|c| c.as_tool_response())
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_and_accessors() {
        let call = ToolCall::new("call_1", "add", json!({"a": 1, "b": 2}));
        let message = Message::assistant()
            .with_text("Let me ")
            .with_text("add that.")
            .with_tool_request(call.clone());

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text(), "Let me add that.");
        assert_eq!(message.tool_requests().collect::<Vec<_>>(), vec![&call]);
        assert_eq!(message.tool_responses().count(), 0);
    }

    #[test]
    fn test_serialization_is_tagged() {
        let message = Message::user().with_image(MediaSource::Url {
            url: "https://example.com/cat.png".to_string(),
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "image");
        assert_eq!(value["content"][0]["source"]["type"], "url");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }
}
