//! Tool provider backed by the Ghidra HTTP plugin.
//!
//! Each tool is a thin passthrough to one plugin endpoint. GET tools send
//! their arguments as query parameters and return the response body line
//! by line; POST tools send form fields and return the trimmed body.

use crate::error::ProviderError;
use crate::models::{CallToolOutput, ContentBlock, ToolArguments};
use crate::tools::provider::{ProviderTool, ToolProvider};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

/// How a tool reaches the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    /// Form-encoded POST body.
    Post,
    /// The single argument is sent as the raw POST body.
    PostRaw,
}

#[derive(Debug, Clone, Copy)]
enum ParamKind {
    Text,
    OptionalText,
    Int(i64),
}

#[derive(Debug, Clone, Copy)]
struct Param {
    /// Argument name the model uses.
    name: &'static str,
    /// Field name the plugin expects.
    field: &'static str,
    kind: ParamKind,
}

const fn text(name: &'static str) -> Param {
    Param {
        name,
        field: name,
        kind: ParamKind::Text,
    }
}

const fn renamed(name: &'static str, field: &'static str) -> Param {
    Param {
        name,
        field,
        kind: ParamKind::Text,
    }
}

const fn int(name: &'static str, default: i64) -> Param {
    Param {
        name,
        field: name,
        kind: ParamKind::Int(default),
    }
}

const fn optional(name: &'static str) -> Param {
    Param {
        name,
        field: name,
        kind: ParamKind::OptionalText,
    }
}

const OFFSET: Param = int("offset", 0);
const LIMIT: Param = int("limit", 100);

#[derive(Debug)]
struct GhidraTool {
    name: &'static str,
    description: &'static str,
    method: Method,
    endpoint: &'static str,
    params: &'static [Param],
}

const GHIDRA_TOOLS: &[GhidraTool] = &[
    GhidraTool {
        name: "list_methods",
        description: "List all function names in the program with pagination.",
        method: Method::Get,
        endpoint: "methods",
        params: &[OFFSET, LIMIT],
    },
    GhidraTool {
        name: "list_classes",
        description: "List all namespace/class names in the program with pagination.",
        method: Method::Get,
        endpoint: "classes",
        params: &[OFFSET, LIMIT],
    },
    GhidraTool {
        name: "decompile_function",
        description: "Decompile a specific function by name and return the decompiled C code.",
        method: Method::PostRaw,
        endpoint: "decompile",
        params: &[text("name")],
    },
    GhidraTool {
        name: "rename_function",
        description: "Rename a function by its current name to a new user-defined name.",
        method: Method::Post,
        endpoint: "renameFunction",
        params: &[renamed("old_name", "oldName"), renamed("new_name", "newName")],
    },
    GhidraTool {
        name: "rename_data",
        description: "Rename a data label at the specified address.",
        method: Method::Post,
        endpoint: "renameData",
        params: &[text("address"), renamed("new_name", "newName")],
    },
    GhidraTool {
        name: "list_segments",
        description: "List all memory segments in the program with pagination.",
        method: Method::Get,
        endpoint: "segments",
        params: &[OFFSET, LIMIT],
    },
    GhidraTool {
        name: "list_imports",
        description: "List imported symbols in the program with pagination.",
        method: Method::Get,
        endpoint: "imports",
        params: &[OFFSET, LIMIT],
    },
    GhidraTool {
        name: "list_exports",
        description: "List exported functions/symbols with pagination.",
        method: Method::Get,
        endpoint: "exports",
        params: &[OFFSET, LIMIT],
    },
    GhidraTool {
        name: "list_namespaces",
        description: "List all non-global namespaces in the program with pagination.",
        method: Method::Get,
        endpoint: "namespaces",
        params: &[OFFSET, LIMIT],
    },
    GhidraTool {
        name: "list_data_items",
        description: "List defined data labels and their values with pagination.",
        method: Method::Get,
        endpoint: "data",
        params: &[OFFSET, LIMIT],
    },
    GhidraTool {
        name: "search_functions_by_name",
        description: "Search for functions whose name contains the given substring.",
        method: Method::Get,
        endpoint: "searchFunctions",
        params: &[text("query"), OFFSET, LIMIT],
    },
    GhidraTool {
        name: "rename_variable",
        description: "Rename a local variable within a function.",
        method: Method::Post,
        endpoint: "renameVariable",
        params: &[
            renamed("function_name", "functionName"),
            renamed("old_name", "oldName"),
            renamed("new_name", "newName"),
        ],
    },
    GhidraTool {
        name: "get_function_by_address",
        description: "Get a function by its address.",
        method: Method::Get,
        endpoint: "get_function_by_address",
        params: &[text("address")],
    },
    GhidraTool {
        name: "get_current_address",
        description: "Get the address currently selected by the user.",
        method: Method::Get,
        endpoint: "get_current_address",
        params: &[],
    },
    GhidraTool {
        name: "get_current_function",
        description: "Get the function currently selected by the user.",
        method: Method::Get,
        endpoint: "get_current_function",
        params: &[],
    },
    GhidraTool {
        name: "list_functions",
        description: "List all functions in the database.",
        method: Method::Get,
        endpoint: "list_functions",
        params: &[],
    },
    GhidraTool {
        name: "decompile_function_by_address",
        description: "Decompile a function at the given address.",
        method: Method::Get,
        endpoint: "decompile_function",
        params: &[text("address")],
    },
    GhidraTool {
        name: "disassemble_function",
        description: "Get assembly code (address: instruction; comment) for a function.",
        method: Method::Get,
        endpoint: "disassemble_function",
        params: &[text("address")],
    },
    GhidraTool {
        name: "set_decompiler_comment",
        description: "Set a comment for a given address in the function pseudocode.",
        method: Method::Post,
        endpoint: "set_decompiler_comment",
        params: &[text("address"), text("comment")],
    },
    GhidraTool {
        name: "set_disassembly_comment",
        description: "Set a comment for a given address in the function disassembly.",
        method: Method::Post,
        endpoint: "set_disassembly_comment",
        params: &[text("address"), text("comment")],
    },
    GhidraTool {
        name: "rename_function_by_address",
        description: "Rename a function by its address.",
        method: Method::Post,
        endpoint: "rename_function_by_address",
        params: &[text("function_address"), text("new_name")],
    },
    GhidraTool {
        name: "set_function_prototype",
        description: "Set a function's prototype.",
        method: Method::Post,
        endpoint: "set_function_prototype",
        params: &[text("function_address"), text("prototype")],
    },
    GhidraTool {
        name: "set_local_variable_type",
        description: "Set a local variable's type.",
        method: Method::Post,
        endpoint: "set_local_variable_type",
        params: &[
            text("function_address"),
            text("variable_name"),
            text("new_type"),
        ],
    },
    GhidraTool {
        name: "get_xrefs_to",
        description: "Get all references to the specified address (xref to). Address is hex, e.g. \"0x1400010a0\".",
        method: Method::Get,
        endpoint: "xrefs_to",
        params: &[text("address"), OFFSET, LIMIT],
    },
    GhidraTool {
        name: "get_xrefs_from",
        description: "Get all references from the specified address (xref from). Address is hex, e.g. \"0x1400010a0\".",
        method: Method::Get,
        endpoint: "xrefs_from",
        params: &[text("address"), OFFSET, LIMIT],
    },
    GhidraTool {
        name: "get_function_xrefs",
        description: "Get all references to the specified function by name.",
        method: Method::Get,
        endpoint: "function_xrefs",
        params: &[text("name"), OFFSET, LIMIT],
    },
    GhidraTool {
        name: "list_strings",
        description: "List all defined strings in the program with their addresses. Optional filter matches within string content.",
        method: Method::Get,
        endpoint: "strings",
        params: &[OFFSET, int("limit", 2000), optional("filter")],
    },
];

impl GhidraTool {
    fn find(name: &str) -> Option<&'static GhidraTool> {
        GHIDRA_TOOLS.iter().find(|tool| tool.name == name)
    }

    fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in self.params {
            let schema = match param.kind {
                ParamKind::Text => {
                    required.push(Value::String(param.name.to_string()));
                    json!({"type": "string"})
                }
                ParamKind::OptionalText => json!({"type": "string"}),
                ParamKind::Int(default) => json!({"type": "integer", "default": default}),
            };
            properties.insert(param.name.to_string(), schema);
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Resolve model arguments into plugin fields, applying defaults.
    fn fields(&self, arguments: &ToolArguments) -> Result<Vec<(String, String)>, ProviderError> {
        let mut fields = Vec::with_capacity(self.params.len());

        for param in self.params {
            let value = arguments.get(param.name).filter(|v| !v.is_null());
            let rendered = match (param.kind, value) {
                (_, Some(v)) => Some(render(v)),
                (ParamKind::Int(default), None) => Some(default.to_string()),
                (ParamKind::OptionalText, None) => None,
                (ParamKind::Text, None) => {
                    return Err(ProviderError::InvalidArguments(format!(
                        "missing required argument '{}' for {}",
                        param.name, self.name
                    )))
                }
            };

            if let Some(rendered) = rendered {
                if matches!(param.kind, ParamKind::OptionalText) && rendered.is_empty() {
                    continue;
                }
                fields.push((param.field.to_string(), rendered));
            }
        }

        Ok(fields)
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Provider exposing the Ghidra plugin's endpoints as tools.
pub struct GhidraProvider {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl GhidraProvider {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        Ok(Self {
            name: "ghidra".to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn send(
        &self,
        tool: &GhidraTool,
        fields: Vec<(String, String)>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = self.url(tool.endpoint);
        let request = match tool.method {
            Method::Get => self.client.get(&url).query(&fields),
            Method::Post => self.client.post(&url).form(&fields),
            Method::PostRaw => {
                let body = fields.into_iter().next().map(|(_, v)| v).unwrap_or_default();
                self.client.post(&url).body(body)
            }
        };
        request.send().await
    }
}

#[async_trait]
impl ToolProvider for GhidraProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ProviderTool>, ProviderError> {
        Ok(GHIDRA_TOOLS
            .iter()
            .map(|tool| ProviderTool {
                name: tool.name.to_string(),
                description: Some(tool.description.to_string()),
                input_schema: Some(tool.input_schema()),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &ToolArguments,
    ) -> Result<CallToolOutput, ProviderError> {
        let tool =
            GhidraTool::find(name).ok_or_else(|| ProviderError::UnknownTool(name.to_string()))?;

        if name == "search_functions_by_name"
            && arguments
                .get("query")
                .and_then(|v| v.as_str())
                .is_some_and(str::is_empty)
        {
            return Ok(CallToolOutput::error_text("Error: query string is required"));
        }

        let fields = tool.fields(arguments)?;
        debug!("Ghidra {} {:?} {:?}", tool.endpoint, tool.method, fields);

        let response = self
            .send(tool, fields)
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !status.is_success() {
            return Ok(CallToolOutput::error_text(format!(
                "Error {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        match tool.method {
            Method::Get => Ok(CallToolOutput {
                content: body.lines().map(ContentBlock::text).collect(),
                is_error: false,
            }),
            Method::Post | Method::PostRaw => Ok(CallToolOutput::text(body.trim())),
        }
    }
}
