use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Map a dotted settings key to the environment variable that sets it
pub fn to_env_var(field_path: &str) -> String {
    // Handle nested fields by converting dots to double underscores
    let normalized_path = field_path.replace('.', "__");
    format!("PARLEY_{}", normalized_path.to_uppercase())
}
