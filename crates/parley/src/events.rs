use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::tool::{ToolCall, ToolResult};

/// The vendor-agnostic vocabulary of a conversation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TokenDelta {
        delta: String,
    },
    ToolCall {
        #[serde(flatten)]
        call: ToolCall,
    },
    ToolResult {
        #[serde(flatten)]
        result: ToolResult,
    },
    FinalMessage {
        content: String,
    },
    Error {
        message: String,
    },
}

impl AgentEvent {
    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::TokenDelta { .. } => "token_delta",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::FinalMessage { .. } => "final_message",
            AgentEvent::Error { .. } => "error",
        }
    }

    /// True for `final_message` and `error`, the events that end a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::FinalMessage { .. } | AgentEvent::Error { .. }
        )
    }
}

/// An event stamped with the run it belongs to.
///
/// Serializes flat: `{type, <fields>, run_id, iteration, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: AgentEvent,
    pub run_id: String,
    pub iteration: usize,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
}

impl EventEnvelope {
    pub fn new<S: Into<String>>(event: AgentEvent, run_id: S, iteration: usize) -> Self {
        Self {
            event,
            run_id: run_id.into(),
            iteration,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}
