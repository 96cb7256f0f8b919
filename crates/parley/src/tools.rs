use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::errors::ToolError;
use crate::models::tool::{ParameterType, ToolCall, ToolDefinition, ToolResult};

/// The callable behind a registered tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with already decoded and validated arguments
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ToolError>;
}

/// Adapter so plain closures can be registered as tools
struct FnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Result<Value, ToolError> + Send + Sync,
{
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        (self.0)(arguments)
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    patterns: HashMap<String, Regex>,
    handler: Arc<dyn ToolHandler>,
}

/// Named, invocable tools with declared parameters.
///
/// Lookups are by exact name. The registry is read-only once a conversation
/// starts and is shared between runs behind an `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ToolError> {
        if self.index.contains_key(&definition.name) {
            return Err(ToolError::DuplicateTool(definition.name));
        }

        let mut patterns = HashMap::new();
        for param in &definition.parameters {
            if let Some(pattern) = &param.pattern {
                let regex = Regex::new(pattern).map_err(|e| {
                    ToolError::InvalidParameters(format!(
                        "Invalid pattern for parameter '{}' of tool '{}': {}",
                        param.name, definition.name, e
                    ))
                })?;
                patterns.insert(param.name.clone(), regex);
            }
        }

        self.index.insert(definition.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            definition,
            patterns,
            handler,
        });
        Ok(())
    }

    /// Register a synchronous closure as a tool
    pub fn register_fn<F>(&mut self, definition: ToolDefinition, f: F) -> Result<(), ToolError>
    where
        F: Fn(Map<String, Value>) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        self.register(definition, Arc::new(FnHandler(f)))
    }

    /// Tool schemas in registration order
    pub fn describe(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Execute a tool by name. Arguments may be a raw JSON string or an object.
    ///
    /// Every failure, including a panicking handler, comes back as a `ToolError`.
    pub async fn execute(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let tool = self
            .index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))?;

        let call = ToolCall::new("", name, arguments.clone());
        let args = call.parsed_arguments()?;
        validate(tool, &args)?;

        match AssertUnwindSafe(tool.handler.call(args)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(ToolError::ExecutionError(format!(
                "Tool '{}' panicked",
                name
            ))),
        }
    }

    /// Execute a model tool call and wrap the outcome, never failing
    pub async fn execute_call(&self, call: &ToolCall) -> ToolResult {
        let outcome = self.execute(&call.name, &call.arguments).await;
        if let Err(e) = &outcome {
            tracing::warn!(tool = %call.name, id = %call.id, error = %e, "tool call failed");
        }
        ToolResult::from_outcome(call, outcome)
    }
}

fn validate(tool: &RegisteredTool, args: &Map<String, Value>) -> Result<(), ToolError> {
    for param in &tool.definition.parameters {
        let Some(value) = args.get(&param.name).filter(|v| !v.is_null()) else {
            if param.required {
                return Err(ToolError::InvalidParameters(format!(
                    "Missing required parameter '{}'",
                    param.name
                )));
            }
            continue;
        };

        if param.param_type == ParameterType::String {
            if let (Some(regex), Some(text)) = (tool.patterns.get(&param.name), value.as_str()) {
                if !regex.is_match(text) {
                    return Err(ToolError::InvalidParameters(format!(
                        "Parameter '{}' does not match pattern {}",
                        param.name,
                        regex.as_str()
                    )));
                }
            }
        }
    }
    Ok(())
}
