//! The interface every tool provider implements.

use crate::error::ProviderError;
use crate::models::{CallToolOutput, ToolArguments};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool as advertised by its provider, before catalogue normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

/// An external service exposing a tool listing and a call primitive.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Name used in logs and collision reports.
    fn name(&self) -> &str;

    /// List the tools this provider exposes.
    async fn list_tools(&self) -> Result<Vec<ProviderTool>, ProviderError>;

    /// Invoke one tool.
    async fn call_tool(
        &self,
        name: &str,
        arguments: &ToolArguments,
    ) -> Result<CallToolOutput, ProviderError>;
}
