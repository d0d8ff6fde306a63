//! Error types for the agent session.
//!
//! Only transport failures and catalogue construction failures ever reach
//! the caller of a session. Tool execution problems are folded into
//! [`crate::models::ToolResult`]s by the dispatcher and handed back to the
//! model as ordinary tool output.

use thiserror::Error;

/// Failure talking to the LLM backend or decoding its reply.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// The backend answered with a non-2xx status.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("empty response")]
    EmptyResponse,

    #[error("unparseable response")]
    Unparseable,
}

/// Failure reported by a tool provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

/// A provider's tool listing failed while building the catalogue.
#[derive(Debug, Error)]
#[error("failed to list tools from provider '{provider}': {source}")]
pub struct RegistryError {
    pub provider: String,
    #[source]
    pub source: ProviderError,
}

/// Errors that end a single `Agent::run` call.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("request cancelled")]
    Cancelled,

    #[error("model kept requesting tools after {0} rounds")]
    RoundLimitExceeded(usize),
}
