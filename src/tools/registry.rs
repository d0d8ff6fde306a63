//! Tool catalogue construction.
//!
//! The catalogue is built once per agent session from every provider's
//! tool listing and is read-only afterwards, so it can be shared between
//! sessions behind an `Arc`.

use crate::error::RegistryError;
use crate::models::{ToolDefinition, ToolDescriptor};
use crate::tools::provider::{ProviderTool, ToolProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immutable snapshot of the invocable tools and their owners.
#[derive(Clone, Default)]
pub struct ToolCatalogue {
    descriptors: Vec<ToolDescriptor>,
    owners: HashMap<String, Arc<dyn ToolProvider>>,
}

impl ToolCatalogue {
    /// Descriptors in registration order.
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn contains(&self, name: &str) -> bool {
        self.owners.contains_key(name)
    }

    /// Provider that owns `name`, if any.
    pub fn owner(&self, name: &str) -> Option<&Arc<dyn ToolProvider>> {
        self.owners.get(name)
    }

    /// Tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.descriptors.iter().map(|d| d.name.clone()).collect();
        names.sort();
        names
    }

    /// Catalogue in the schema form sent to the backend.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.descriptors.iter().map(ToolDefinition::from).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn insert(&mut self, provider: &Arc<dyn ToolProvider>, tool: ProviderTool) {
        let descriptor = ToolDescriptor {
            description: tool.description.unwrap_or_default(),
            parameters: tool
                .input_schema
                .filter(|schema| !schema.is_null())
                .unwrap_or_else(ToolDescriptor::open_schema),
            name: tool.name,
        };

        if let Some(previous) = self.owners.get(&descriptor.name) {
            warn!(
                "Tool '{}' from provider '{}' replaces the one from provider '{}'",
                descriptor.name,
                provider.name(),
                previous.name()
            );
            self.descriptors.retain(|d| d.name != descriptor.name);
        }

        self.owners
            .insert(descriptor.name.clone(), Arc::clone(provider));
        self.descriptors.push(descriptor);
    }
}

impl std::fmt::Debug for ToolCatalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalogue")
            .field("tools", &self.names())
            .finish()
    }
}

/// Query every provider's tool listing and fold the results into one
/// catalogue. The last provider wins on a name collision.
///
/// A failed listing aborts the whole build.
pub async fn build_catalogue(
    providers: &[Arc<dyn ToolProvider>],
) -> Result<ToolCatalogue, RegistryError> {
    let mut catalogue = ToolCatalogue::default();

    for provider in providers {
        let tools = provider
            .list_tools()
            .await
            .map_err(|source| RegistryError {
                provider: provider.name().to_string(),
                source,
            })?;

        debug!("Provider {} lists {} tools", provider.name(), tools.len());

        for tool in tools {
            catalogue.insert(provider, tool);
        }
    }

    info!(
        "Tool catalogue built with {} tools from {} providers",
        catalogue.len(),
        providers.len()
    );

    Ok(catalogue)
}
