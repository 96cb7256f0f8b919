use std::sync::Arc;

use parley::agent::Agent;
use parley::errors::ConfigError;
use parley::providers::factory::{self, ModelOverrides, ModelSelection};
use parley::tools::ToolRegistry;
use serde::Deserialize;

use crate::configuration::Settings;

/// Per-request knobs from the `options` object of a chat request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatOptions {
    #[serde(flatten)]
    pub model: ModelOverrides,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub trace_level: Option<String>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            tools: Arc::new(ToolRegistry::new()),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    /// The provider and model a request with `options` would run against
    pub fn select_model(&self, options: &ChatOptions) -> ModelSelection {
        let agent = &self.settings.agent;
        ModelSelection::resolve(agent.provider, agent.model.as_deref(), &options.model)
    }

    /// Build an agent for one request. Fails before any network I/O when the
    /// selected provider is missing credentials.
    pub fn build_agent(
        &self,
        options: &ChatOptions,
    ) -> Result<(Agent, ModelSelection), ConfigError> {
        let selection = self.select_model(options);
        let config = self
            .settings
            .provider_config(selection.provider, options.api_key.clone())?;
        let provider = factory::get_provider(config)?;

        let agent_settings = &self.settings.agent;
        let agent = Agent::new(provider, selection.model.clone())
            .with_tools(self.tools.clone())
            .with_options(agent_settings.request_options(options.temperature, options.max_tokens))
            .with_max_iterations(
                options
                    .max_iterations
                    .unwrap_or(agent_settings.max_iterations),
            );

        Ok((agent, selection))
    }
}
