//! Data models for the agent.
//!
//! This module contains the value types shared by the agent loop, the
//! tool registry and the dispatcher: conversation turns, tool requests,
//! tool descriptors and normalized tool results. They are decoded once at
//! the protocol boundary and treated as immutable values afterwards.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Arguments passed to a tool.
pub type ToolArguments = Map<String, Value>;

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: ToolArguments,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, arguments: ToolArguments) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Wire form of a tool call inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub function: ToolRequest,
}

/// One entry in the conversation transcript.
///
/// Serializes to the message shape expected by Ollama's `/api/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Model reasoning trace (assistant turns only).
    #[serde(rename = "thinking", default, skip_serializing_if = "Option::is_none")]
    pub reasoning_text: Option<String>,
    /// Tool calls requested by the model (assistant turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
    /// Name of the tool that produced this turn (tool turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Turn {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning_text: None,
            tool_calls: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Build an assistant turn. Empty thinking and an empty request list are
    /// omitted from the wire form.
    pub fn assistant(
        content: impl Into<String>,
        thinking: Option<String>,
        requests: Vec<ToolRequest>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            reasoning_text: thinking.filter(|t| !t.is_empty()),
            tool_calls: if requests.is_empty() {
                None
            } else {
                Some(
                    requests
                        .into_iter()
                        .map(|function| ToolCallMessage { function })
                        .collect(),
                )
            },
            tool_name: None,
        }
    }

    pub fn tool(result: &ToolResult) -> Self {
        Self {
            tool_name: Some(result.tool_name.clone()),
            ..Self::plain(Role::Tool, result.content.clone())
        }
    }

    /// Tool requests carried by this turn, in the order they were made.
    pub fn requested_tool_calls(&self) -> impl Iterator<Item = &ToolRequest> {
        self.tool_calls.iter().flatten().map(|call| &call.function)
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// A tool as it appears in the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the accepted arguments.
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Schema used when a provider does not describe a tool's arguments.
    pub fn open_schema() -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": true
        })
    }
}

/// Tool definition for Ollama's tool-calling API.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolDescriptor> for ToolDefinition {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                parameters: descriptor.parameters.clone(),
            },
        }
    }
}

/// Normalized outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, content: String) -> Self {
        Self {
            tool_name: tool_name.into(),
            content,
            is_error: false,
        }
    }

    pub fn error(tool_name: impl Into<String>, message: String) -> Self {
        Self {
            tool_name: tool_name.into(),
            content: message,
            is_error: true,
        }
    }
}

/// A content block returned by a provider's call primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// Raw result of a provider call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolOutput {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: true,
        }
    }

    /// Newline-joined text blocks, or `None` when there are no text blocks.
    pub fn joined_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// Coerce a model-supplied `arguments` value into an argument map.
///
/// Objects pass through, JSON-encoded strings are decoded, `null` becomes
/// an empty map and anything else is wrapped as `{"raw": ...}`.
pub fn normalize_arguments(value: &Value) -> ToolArguments {
    match value {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Map::new();
                map.insert("raw".to_string(), Value::String(s.clone()));
                map
            }
        },
        other => {
            let mut map = Map::new();
            map.insert("raw".to_string(), Value::String(other.to_string()));
            map
        }
    }
}
