use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single tool invocation. Local to the tool result it belongs to,
/// never fatal to the conversation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),
}

impl ToolError {
    /// Stable machine-readable kind used in error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::ToolNotFound(_) => "tool_not_found",
            ToolError::InvalidParameters(_) => "invalid_parameters",
            ToolError::ExecutionError(_) => "execution_error",
            ToolError::DuplicateTool(_) => "duplicate_tool",
        }
    }
}

/// Vendor-level failures. Adapters turn these into a terminal `Failed` item
/// instead of returning them.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} request failed with status {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No data received from provider within {0:?}")]
    Timeout(Duration),

    #[error("{provider} error: {message}")]
    Vendor {
        provider: &'static str,
        message: String,
    },

    #[error("{0} stream ended unexpectedly")]
    UnexpectedEnd(&'static str),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

/// Setup problems detected before any network call is made
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Provider '{provider}' requires an API key")]
    MissingCredential { provider: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Raised by the stream bridge when the worker task died instead of finishing
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Conversation worker failed: {0}")]
    WorkerFailed(String),

    #[error("Conversation failed: {0}")]
    Run(String),
}
