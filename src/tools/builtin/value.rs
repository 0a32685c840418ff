//! Value read tool

use crate::operations::{read_values, ValueRequest};
use crate::tools::{parameters_schema, parse_parameters, to_output};
use crate::tools::{Tool, ToolContext, ToolDescription, ToolError};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ValueParams {
    /// Exact topic names, no wildcards
    #[schemars(length(min = 1))]
    pub topics: Vec<String>,
    /// Seconds to wait for each topic not in the cache
    #[serde(default = "default_timeout")]
    #[schemars(range(min = 1, max = 60))]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    5
}

/// Reads current values, answering from the cache when it can
pub struct ValueTool {
    context: ToolContext,
}

impl ValueTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for ValueTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "value".to_string(),
            description: "Read the current value of one or more topics, from the cache when \
                          known, otherwise by waiting up to timeout seconds for a message"
                .to_string(),
            parameters: parameters_schema::<ValueParams>(),
        }
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let params: ValueParams = parse_parameters(parameters)?;
        let request = ValueRequest {
            topics: params.topics,
            timeout: Duration::from_secs(params.timeout),
            max_age: self
                .context
                .config
                .cache
                .max_age_secs
                .map(Duration::from_secs),
        };

        let report = read_values(self.context.broker.as_ref(), &self.context.cache, &request).await;
        to_output(Ok(report))
    }
}
