use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum_macros::Display;

use crate::errors::ToolError;

/// JSON type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub required: bool,
    /// Regex the value must match. Only checked for string parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ParameterSpec {
    pub fn new<N, D>(name: N, description: D, param_type: ParameterType) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            param_type,
            required: false,
            pattern: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// A tool that can be used by a model, described independently of any vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool, unique within a registry
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// Parameters that the tool accepts, in declaration order
    pub parameters: Vec<ParameterSpec>,
}

impl ToolDefinition {
    pub fn new<N, D>(name: N, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Render the parameter list as a JSON schema object
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut property = json!({
                "type": param.param_type.to_string(),
                "description": param.description,
            });
            if let Some(pattern) = &param.pattern {
                property["pattern"] = json!(pattern);
            }
            properties.insert(param.name.clone(), property);
            if param.required {
                required.push(json!(param.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Vendor-assigned id, unique within one streaming response
    pub id: String,
    /// The name of the tool to execute
    pub name: String,
    /// Either the raw JSON string as streamed or an already decoded object
    pub arguments: Value,
}

impl ToolCall {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Decode the arguments into a JSON object. An empty string counts as `{}`.
    pub fn parsed_arguments(&self) -> Result<Map<String, Value>, ToolError> {
        let decoded = match &self.arguments {
            Value::String(raw) if raw.trim().is_empty() => Value::Object(Map::new()),
            Value::String(raw) => serde_json::from_str::<Value>(raw).map_err(|e| {
                ToolError::InvalidParameters(format!(
                    "Could not decode arguments for tool call {}: {}",
                    self.id, e
                ))
            })?,
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };

        match decoded {
            Value::Object(map) => Ok(map),
            other => Err(ToolError::InvalidParameters(format!(
                "Arguments for tool call {} must be an object, got {}",
                self.id, other
            ))),
        }
    }

    /// Arguments as an object for vendors that want structured input, `{}` when undecodable
    pub fn arguments_object(&self) -> Value {
        self.parsed_arguments()
            .map(Value::Object)
            .unwrap_or_else(|_| json!({}))
    }

    /// Arguments as a JSON string for vendors that want the raw form
    pub fn arguments_string(&self) -> String {
        match &self.arguments {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }
    }
}

/// The outcome of one tool call, correlated by `tool_call_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub output: Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            is_error: false,
        }
    }

    pub fn failure(call: &ToolCall, error: &ToolError) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            output: json!({
                "error": error.to_string(),
                "kind": error.kind(),
            }),
            is_error: true,
        }
    }

    pub fn from_outcome(call: &ToolCall, outcome: Result<Value, ToolError>) -> Self {
        match outcome {
            Ok(output) => Self::success(call, output),
            Err(error) => Self::failure(call, &error),
        }
    }

    /// Output as text; strings are passed through, everything else is JSON encoded
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}
