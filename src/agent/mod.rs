//! LLM agent modules.
//!
//! This module provides the tool-calling agent loop together with the
//! conversation log, the backend transport and the inline tool-call
//! recovery it relies on.

pub mod agent_loop;
pub mod conversation;
pub mod recovery;
pub mod transport;

pub use agent_loop::{Agent, AgentConfig};
pub use transport::OllamaTransport;
