//! Tool discovery and execution.
//!
//! Providers advertise tools, the registry folds them into a session
//! catalogue and the dispatcher routes model requests back to the owning
//! provider.

pub mod dispatcher;
pub mod ghidra;
pub mod provider;
pub mod registry;

pub use dispatcher::ToolDispatcher;
pub use ghidra::GhidraProvider;
pub use provider::ToolProvider;
pub use registry::{build_catalogue, ToolCatalogue};
