//! Batch publish tool

use crate::operations::{publish_batch, PublishRequest};
use crate::tools::{parameters_schema, parse_parameters, to_output};
use crate::tools::{Tool, ToolContext, ToolDescription, ToolError};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Messages stay untyped here so one malformed entry is reported on its own
/// instead of failing the whole call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PublishParams {
    /// Objects of the form `{topic, payload, qos?, retain?}`
    #[schemars(length(min = 1))]
    pub messages: Vec<Value>,
    /// Seconds allowed for each message to be accepted
    #[serde(default = "default_timeout")]
    #[schemars(range(min = 1, max = 30))]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    5
}

pub struct PublishTool {
    context: ToolContext,
}

impl PublishTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for PublishTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "publish".to_string(),
            description: "Publish one or more messages; each message gets its own accepted or \
                          rejected outcome"
                .to_string(),
            parameters: parameters_schema::<PublishParams>(),
        }
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let params: PublishParams = parse_parameters(parameters)?;
        let request = PublishRequest {
            messages: params.messages,
            timeout: Duration::from_secs(params.timeout),
        };
        to_output(Ok(publish_batch(self.context.broker.as_ref(), &request).await))
    }
}
