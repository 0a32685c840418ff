//! Event recording tool

use crate::operations::{record, RecordRequest};
use crate::tools::{parameters_schema, parse_parameters, to_output};
use crate::tools::{Tool, ToolContext, ToolDescription, ToolError};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecordParams {
    /// Recording window in seconds
    #[serde(default = "default_timeout")]
    #[schemars(range(min = 1, max = 300))]
    pub timeout: u64,
    /// Topic filters, wildcards allowed; empty records everything
    #[serde(default)]
    pub topics: Vec<String>,
    /// Case-insensitive substrings matched against the topic
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_timeout() -> u64 {
    30
}

/// Records every matching message for the whole window
pub struct RecordTool {
    context: ToolContext,
}

impl RecordTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for RecordTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "record".to_string(),
            description: "Record all messages matching the topic filters and keywords for \
                          timeout seconds, in arrival order, with per-message changes"
                .to_string(),
            parameters: parameters_schema::<RecordParams>(),
        }
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let params: RecordParams = parse_parameters(parameters)?;
        let request = RecordRequest {
            timeout: Duration::from_secs(params.timeout),
            topics: params.topics,
            keywords: params.keywords,
            ignored_prefixes: self.context.config.record.ignored_prefixes.clone(),
        };
        to_output(record(self.context.broker.as_ref(), &self.context.cache, &request).await)
    }
}
