//! Routes tool requests to their owning provider.
//!
//! Every failure mode is converted into an error-flagged [`ToolResult`] so
//! the model can read it and decide what to do next. Results always come
//! back in request order.

use crate::models::{CallToolOutput, ToolRequest, ToolResult};
use crate::tools::registry::ToolCatalogue;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, warn};

/// The tool dispatcher.
#[derive(Debug, Clone, Default)]
pub struct ToolDispatcher {
    /// Run the requests of one round concurrently.
    parallel: bool,
}

impl ToolDispatcher {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    /// Execute `requests` against the catalogue, one result per request.
    pub async fn execute(
        &self,
        requests: &[ToolRequest],
        catalogue: &ToolCatalogue,
    ) -> Vec<ToolResult> {
        if self.parallel && requests.len() > 1 {
            // join_all yields outputs in input order
            return join_all(requests.iter().map(|r| self.execute_one(r, catalogue))).await;
        }

        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.execute_one(request, catalogue).await);
        }
        results
    }

    /// Execute a single request.
    pub async fn execute_one(&self, request: &ToolRequest, catalogue: &ToolCatalogue) -> ToolResult {
        match self.call_provider(request, catalogue).await {
            Ok(output) => normalize_output(&request.name, &output),
            Err(result) => result,
        }
    }

    /// Call the owning provider and hand back its raw output. Unknown tools
    /// and provider failures come back as the error result to report.
    pub async fn call_provider(
        &self,
        request: &ToolRequest,
        catalogue: &ToolCatalogue,
    ) -> Result<CallToolOutput, ToolResult> {
        let name = request.name.as_str();

        let Some(provider) = catalogue.owner(name) else {
            warn!("Model requested unknown tool: {}", name);
            return Err(ToolResult::error(
                name,
                format!("Error: no provider exposes tool '{}'.", name),
            ));
        };

        debug!(
            "Executing tool {} via {} with args: {:?}",
            name,
            provider.name(),
            request.arguments
        );

        match provider.call_tool(name, &request.arguments).await {
            Ok(output) => {
                info!("Tool {} executed", name);
                Ok(output)
            }
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                Err(ToolResult::error(
                    name,
                    format!("Error executing tool '{}': {}", name, e),
                ))
            }
        }
    }
}

/// Collapse a provider result into one text payload.
///
/// Text blocks are joined with newlines. Without any text block the whole
/// result is serialized as JSON so the model never receives an empty
/// string.
pub fn normalize_output(tool_name: &str, output: &CallToolOutput) -> ToolResult {
    let content = output.joined_text().unwrap_or_else(|| {
        json!({
            "isError": output.is_error,
            "content": output.content,
        })
        .to_string()
    });

    ToolResult {
        tool_name: tool_name.to_string(),
        content,
        is_error: output.is_error,
    }
}
