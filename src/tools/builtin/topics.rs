//! Topic discovery tool

use crate::operations::{scan, ScanRequest};
use crate::tools::{parameters_schema, parse_parameters, to_output};
use crate::tools::{Tool, ToolContext, ToolDescription, ToolError};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TopicsParams {
    /// Seconds to listen for new topics
    #[serde(default = "default_scan_timeout")]
    #[schemars(range(min = 1, max = 60))]
    pub scan_timeout: u64,
    /// Case-insensitive substrings; a topic matching any of them is returned
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_limit")]
    #[schemars(range(min = 1, max = 200))]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Attach the last known payload of each topic
    #[serde(default)]
    pub include_values: bool,
}

fn default_scan_timeout() -> u64 {
    5
}

fn default_limit() -> usize {
    50
}

impl From<TopicsParams> for ScanRequest {
    fn from(params: TopicsParams) -> Self {
        Self {
            scan_timeout: Duration::from_secs(params.scan_timeout),
            keywords: params.keywords,
            limit: params.limit,
            offset: params.offset,
            include_values: params.include_values,
        }
    }
}

/// Scans the broker and returns one page of known topics
pub struct TopicsTool {
    context: ToolContext,
}

impl TopicsTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for TopicsTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "topics".to_string(),
            description: "Listen on the broker for scan_timeout seconds, then list known topics \
                          filtered by keywords, sorted by name and paginated"
                .to_string(),
            parameters: parameters_schema::<TopicsParams>(),
        }
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let params: TopicsParams = parse_parameters(parameters)?;
        let request = ScanRequest::from(params);
        to_output(scan(self.context.broker.as_ref(), &self.context.cache, &request).await)
    }
}
