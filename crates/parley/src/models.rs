//! These models represent the objects passed around by the conversation loop
//!
//! There are several different related formats we need to interact with:
//! - chat history and attachments, sent from a caller to the loop
//! - openai responses items/tools, sent from the loop to the LLM
//! - anthropic messages/tools, sent from the loop to the LLM
//! - gemini contents/function declarations, sent from the loop to the LLM
//! - ollama chat messages/tools, sent from the loop to the LLM
//!
//! These all overlap to varying degrees. We always immediately convert those data models
//! into the internal structs using to/from helpers. Because of the need for compatibility,
//! the internal models are not an exactly match to any of these formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
pub mod transcript;
