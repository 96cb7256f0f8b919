use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use parley::errors::ConfigError as ProviderConfigError;
use parley::providers::configs::{ProviderConfig, RequestOptions};
use parley::providers::factory::ProviderType;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Defaults for every conversation run; requests may override most of them
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_provider")]
    pub provider: ProviderType,
    /// Falls back to the provider's default model
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_iterations: default_max_iterations(),
            read_timeout_secs: default_read_timeout_secs(),
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl AgentSettings {
    /// Request options for a run, letting per-request values win
    pub fn request_options(
        &self,
        temperature: Option<f32>,
        max_output_tokens: Option<u32>,
    ) -> RequestOptions {
        RequestOptions {
            temperature: temperature.or(self.temperature),
            max_output_tokens: max_output_tokens.or(self.max_output_tokens),
            read_timeout: Some(Duration::from_secs(self.read_timeout_secs)),
        }
    }
}

/// Connection details for one vendor
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub openai: VendorSettings,
    #[serde(default)]
    pub anthropic: VendorSettings,
    #[serde(default)]
    pub gemini: VendorSettings,
    #[serde(default)]
    pub ollama: VendorSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let mut settings = Self::load_and_validate()?;
        settings.apply_vendor_env_fallbacks();
        Ok(settings)
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        // Start with default configuration
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Agent defaults
            .set_default("agent.provider", default_provider().to_string())?
            .set_default("agent.max_iterations", default_max_iterations() as u64)?
            .set_default("agent.read_timeout_secs", default_read_timeout_secs())?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("PARLEY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Try to deserialize the configuration
        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        // Handle missing field errors specially
        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // Handle both NotFound and missing field message variants
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // Extract field name from error message "missing field `type`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    let env_var = to_env_var(field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else if let config::ConfigError::NotFound(field) = &err {
                    let env_var = to_env_var(field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    /// Accept the vendors' conventional variables when no PARLEY_ value is set
    fn apply_vendor_env_fallbacks(&mut self) {
        fill_from_env(&mut self.openai.api_key, "OPENAI_API_KEY");
        fill_from_env(&mut self.anthropic.api_key, "ANTHROPIC_API_KEY");
        fill_from_env(&mut self.gemini.api_key, "GEMINI_API_KEY");
        fill_from_env(&mut self.ollama.host, "OLLAMA_HOST");
    }

    pub fn vendor(&self, provider: ProviderType) -> &VendorSettings {
        match provider {
            ProviderType::OpenAi => &self.openai,
            ProviderType::Anthropic => &self.anthropic,
            ProviderType::Gemini => &self.gemini,
            ProviderType::Ollama => &self.ollama,
        }
    }

    /// Provider config for `provider`; a request-supplied key replaces the configured one
    pub fn provider_config(
        &self,
        provider: ProviderType,
        api_key_override: Option<String>,
    ) -> Result<ProviderConfig, ProviderConfigError> {
        let vendor = self.vendor(provider);
        let api_key = api_key_override
            .filter(|k| !k.trim().is_empty())
            .or_else(|| vendor.api_key.clone());
        ProviderConfig::new(provider, vendor.host.clone(), api_key)
    }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if slot.as_deref().map_or(true, |v| v.trim().is_empty()) {
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                *slot = Some(value);
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_provider() -> ProviderType {
    ProviderType::Ollama
}

fn default_max_iterations() -> usize {
    parley::agent::DEFAULT_MAX_ITERATIONS
}

fn default_read_timeout_secs() -> u64 {
    300
}
