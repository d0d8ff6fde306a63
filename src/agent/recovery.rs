//! Best-effort recovery of tool calls written as inline JSON.
//!
//! Some models ignore the structured `tool_calls` field and print the call
//! as JSON in their text, often inside a fenced code block. This module
//! tries to turn that text back into tool requests. It is a heuristic
//! adapter, not a parser: anything it does not recognise yields `None`
//! and the original text is left alone.

use crate::models::{normalize_arguments, ToolRequest};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

fn fenced_block_regex() -> &'static Regex {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    FENCED.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid fenced block regex")
    })
}

/// Pick the text to try as JSON: the last fenced block if there is one,
/// otherwise the whole trimmed content.
pub fn json_candidate(content: &str) -> &str {
    fenced_block_regex()
        .captures_iter(content)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| content.trim())
}

/// Extract tool requests from free text.
///
/// Accepts a single `{"name": ..., "arguments": ...}` object or an array of
/// them. Only names accepted by `is_known` are kept. Returns `None` when
/// nothing usable was found.
pub fn recover_tool_calls<F>(content: &str, is_known: F) -> Option<Vec<ToolRequest>>
where
    F: Fn(&str) -> bool,
{
    let candidate = json_candidate(content);
    if candidate.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(e) => {
            debug!("Inline tool call recovery skipped: {}", e);
            return None;
        }
    };

    let mut requests = Vec::new();
    collect_requests(&value, &is_known, &mut requests);

    if requests.is_empty() {
        None
    } else {
        Some(requests)
    }
}

fn collect_requests<F>(value: &Value, is_known: &F, out: &mut Vec<ToolRequest>)
where
    F: Fn(&str) -> bool,
{
    match value {
        Value::Array(items) => {
            for item in items {
                collect_requests(item, is_known, out);
            }
        }
        Value::Object(map) => {
            let (Some(name), Some(arguments)) = (map.get("name"), map.get("arguments")) else {
                return;
            };
            let Some(name) = name.as_str() else {
                return;
            };
            if is_known(name) {
                out.push(ToolRequest::new(name, normalize_arguments(arguments)));
            } else {
                debug!("Ignoring inline call to unknown tool {}", name);
            }
        }
        _ => {}
    }
}
