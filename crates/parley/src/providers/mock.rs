use futures::stream;
use std::sync::Arc;
use std::sync::Mutex;

use super::configs::RequestOptions;
use super::factory::ProviderType;
use crate::models::message::Message;
use crate::providers::base::{CompletionRequest, Provider, ProviderStream, StreamItem};

/// What the mock saw on one call
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub options: RequestOptions,
}

/// A mock provider that replays pre-configured streams for testing
pub struct MockProvider {
    provider_type: ProviderType,
    rounds: Arc<Mutex<Vec<Vec<StreamItem>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockProvider {
    /// Create a new mock provider with one scripted stream per call
    pub fn new(rounds: Vec<Vec<StreamItem>>) -> Self {
        Self {
            provider_type: ProviderType::Ollama,
            rounds: Arc::new(Mutex::new(rounds)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_provider_type(mut self, provider_type: ProviderType) -> Self {
        self.provider_type = provider_type;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Provider for MockProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn stream<'a>(&'a self, request: CompletionRequest<'a>) -> ProviderStream<'a> {
        self.requests.lock().unwrap().push(RecordedRequest {
            model: request.model.to_string(),
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            options: request.options.clone(),
        });

        let mut rounds = self.rounds.lock().unwrap();
        let items = if rounds.is_empty() {
            vec![StreamItem::Failed("mock provider has no scripted response".to_string())]
        } else {
            rounds.remove(0)
        };
        Box::pin(stream::iter(items))
    }
}
