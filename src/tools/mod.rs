//! Tool surface consumed by the protocol front-end
//!
//! Every operation is exposed as a [`Tool`] with a JSON schema generated from
//! its parameter struct. [`ToolSystem::execute_tool`] validates parameters
//! against that schema before the tool runs.

use crate::cache::TopicCache;
use crate::config::ToolsConfig;
use crate::error::{sanitize_error_message, ToolsError, ToolsResult};
use crate::protocol::messages::{ErrorCode, ErrorResult};
use crate::transport::Broker;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, Instrument};

pub mod builtin;

/// A named operation with a JSON-schema described parameter object
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, human description and parameter schema
    fn describe(&self) -> ToolDescription;

    /// Run with parameters that already passed schema validation
    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Shared state every builtin tool works against
#[derive(Clone)]
pub struct ToolContext {
    pub broker: Arc<dyn Broker>,
    pub cache: Arc<TopicCache>,
    pub config: Arc<ToolsConfig>,
}

impl ToolContext {
    pub fn new(broker: Arc<dyn Broker>, cache: Arc<TopicCache>, config: ToolsConfig) -> Self {
        Self {
            broker,
            cache,
            config: Arc::new(config),
        }
    }
}

/// Registry of tools by name
pub struct ToolSystem {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolSystem {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// The four broker tools over one shared context
    pub fn with_builtin_tools(context: ToolContext) -> Self {
        let mut system = Self::new();
        system.register(Box::new(builtin::TopicsTool::new(context.clone())));
        system.register(Box::new(builtin::ValueTool::new(context.clone())));
        system.register(Box::new(builtin::PublishTool::new(context.clone())));
        system.register(Box::new(builtin::RecordTool::new(context)));
        system
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.describe().name;
        self.tools.insert(name, tool);
    }

    pub fn describe_tool(&self, tool_name: &str) -> Option<ToolDescription> {
        self.tools.get(tool_name).map(|tool| tool.describe())
    }

    /// Descriptions of every tool, sorted by name
    pub fn describe_all(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> =
            self.tools.values().map(|tool| tool.describe()).collect();
        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    /// Execute tool with validated parameters
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        parameters: &Value,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        self.validate_parameters(tool.as_ref(), parameters)?;

        let span = crate::tool_span!(tool = tool_name);
        async {
            debug!("Executing tool");
            tool.execute(parameters).await
        }
        .instrument(span)
        .await
    }

    fn validate_parameters(&self, tool: &dyn Tool, parameters: &Value) -> Result<(), ToolError> {
        let description = tool.describe();
        let validator = jsonschema::validator_for(&description.parameters)
            .map_err(|e| ToolError::SchemaError(format!("Schema compilation error: {e}")))?;

        validator.validate(parameters).map_err(|errors| {
            let error_messages: Vec<String> = errors
                .map(|e| format!("At '{}': {}", e.instance_path, e))
                .collect();
            ToolError::ValidationError(error_messages.join("; "))
        })
    }

    /// Names of registered tools, sorted
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Tool registry errors
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Parameter validation failed: {0}")]
    ValidationError(String),
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Tool execution failed: {0}")]
    Execution(#[from] ToolsError),
}

impl ToolError {
    /// Structured payload for callers of the tool surface
    pub fn to_error_result(&self) -> ErrorResult {
        match self {
            ToolError::Execution(error) => error.to_error_result(),
            ToolError::SchemaError(_) => ErrorResult {
                code: ErrorCode::InternalError,
                message: sanitize_error_message(&self.to_string()),
                suggestion: None,
            },
            ToolError::UnknownTool(_) => ErrorResult {
                code: ErrorCode::ValidationError,
                message: self.to_string(),
                suggestion: Some("Available tools: publish, record, topics, value".to_string()),
            },
            ToolError::ValidationError(_) | ToolError::InvalidParameters(_) => ErrorResult {
                code: ErrorCode::ValidationError,
                message: sanitize_error_message(&self.to_string()),
                suggestion: None,
            },
        }
    }
}

/// JSON schema for a parameter struct
pub(crate) fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}))
}

pub(crate) fn parse_parameters<T: DeserializeOwned>(parameters: &Value) -> Result<T, ToolError> {
    serde_json::from_value(parameters.clone())
        .map_err(|e| ToolError::InvalidParameters(e.to_string()))
}

/// Serialize a result, turning operation failures into `{"error": ...}` payloads
pub(crate) fn to_output<T: Serialize>(result: ToolsResult<T>) -> Result<Value, ToolError> {
    match result {
        Ok(value) => serde_json::to_value(value)
            .map_err(|e| ToolError::Execution(ToolsError::internal(e.to_string()))),
        Err(error) => Ok(json!({ "error": error.to_error_result() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBroker;

    fn system() -> ToolSystem {
        let context = ToolContext::new(
            Arc::new(MockBroker::new()),
            Arc::new(TopicCache::in_memory()),
            ToolsConfig::default(),
        );
        ToolSystem::with_builtin_tools(context)
    }

    #[test]
    fn test_builtin_tools_registered() {
        let system = system();
        assert_eq!(
            system.list_tools(),
            vec!["publish", "record", "topics", "value"]
        );
        for description in system.describe_all() {
            assert_eq!(description.parameters["type"], "object");
            assert!(!description.description.is_empty());
        }
    }

    #[test]
    fn test_empty_tool_system() {
        let system = ToolSystem::default();
        assert!(system.list_tools().is_empty());
        assert!(system.describe_tool("topics").is_none());
    }

    #[tokio::test]
    async fn test_tool_execution_unknown_tool() {
        let result = system().execute_tool("unknown", &json!({})).await;
        assert!(matches!(result, Err(ToolError::UnknownTool(_))));
    }

    #[test]
    fn test_validation_reports_every_failing_field() {
        let system = system();
        let topics = system.tools.get("topics").unwrap();

        assert!(system
            .validate_parameters(topics.as_ref(), &json!({}))
            .is_ok());
        assert!(system
            .validate_parameters(topics.as_ref(), &json!({"keywords": ["door"], "limit": 200}))
            .is_ok());

        match system.validate_parameters(topics.as_ref(), &json!({"scan_timeout": 0, "limit": 500})) {
            Err(ToolError::ValidationError(message)) => {
                assert!(message.contains("scan_timeout"), "{message}");
                assert!(message.contains("limit"), "{message}");
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_schema_rejects_out_of_range_parameters() {
        let system = system();

        let result = system
            .execute_tool("topics", &json!({"scan_timeout": 0}))
            .await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));

        let result = system
            .execute_tool("value", &json!({"topics": []}))
            .await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));

        let result = system.execute_tool("value", &json!({})).await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));

        let result = system
            .execute_tool("record", &json!({"timeout": 301}))
            .await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));

        let result = system
            .execute_tool("topics", &json!({"unexpected": true}))
            .await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));
    }

    #[test]
    fn test_tool_error_codes() {
        let unknown = ToolError::UnknownTool("scan".to_string()).to_error_result();
        assert_eq!(unknown.code, ErrorCode::ValidationError);
        assert!(unknown.suggestion.unwrap().contains("topics"));

        let schema = ToolError::SchemaError("broken".to_string()).to_error_result();
        assert_eq!(schema.code, ErrorCode::InternalError);

        let execution = ToolError::from(ToolsError::internal("boom")).to_error_result();
        assert_eq!(execution.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_operation_errors_become_payloads() {
        let output = to_output::<()>(Err(ToolsError::validation("bad filter"))).unwrap();
        assert_eq!(output["error"]["code"], "validation_error");
        assert!(output["error"]["message"]
            .as_str()
            .unwrap()
            .contains("bad filter"));
    }
}
