//! HTTP exchange with the LLM backend.
//!
//! The request always asks for a non-streaming reply, but some backends
//! still answer with several newline-delimited JSON objects or SSE
//! framing. The body is therefore read as text and only the last
//! remaining line is decoded.

use crate::error::TransportError;
use crate::models::{ToolDefinition, Turn};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Terminator line emitted by SSE-style backends.
const STREAM_SENTINEL: &str = "[DONE]";
const SSE_PREFIX: &str = "data: ";

/// Ollama chat API request.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Turn],
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
}

/// Something that can answer a chat request.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, request: &ChatRequest<'_>) -> Result<Value, TransportError>;
}

/// Client for Ollama's `/api/chat` endpoint.
pub struct OllamaTransport {
    ollama_url: String,
    timeout_seconds: u64,
    http_client: reqwest::Client,
}

impl OllamaTransport {
    pub fn new(ollama_url: &str, timeout_seconds: u64) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| TransportError::Request {
                url: ollama_url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            ollama_url: ollama_url.trim_end_matches('/').to_string(),
            timeout_seconds,
            http_client,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.ollama_url)
    }
}

#[async_trait]
impl ChatBackend for OllamaTransport {
    async fn send(&self, request: &ChatRequest<'_>) -> Result<Value, TransportError> {
        let url = self.chat_url();
        debug!(
            "Sending chat request with {} messages and {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    format!("timed out after {}s", self.timeout_seconds)
                } else if e.is_connect() {
                    "cannot connect. Is Ollama running?".to_string()
                } else {
                    e.to_string()
                };
                TransportError::Request {
                    url: url.clone(),
                    message,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(|e| TransportError::Request {
            url: url.clone(),
            message: e.to_string(),
        })?;

        parse_response_body(&body)
    }
}

/// Decode the final JSON object of a possibly multi-object body.
pub fn parse_response_body(body: &str) -> Result<Value, TransportError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(TransportError::EmptyResponse);
    }

    let last = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.strip_prefix(SSE_PREFIX).unwrap_or(line).trim())
        .filter(|line| *line != STREAM_SENTINEL)
        .last()
        .ok_or(TransportError::Unparseable)?;

    serde_json::from_str(last).map_err(|e| {
        debug!("Failed to decode backend line: {}", e);
        TransportError::Unparseable
    })
}
