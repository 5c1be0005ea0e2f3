//! Tool registry.
//!
//! Registration order is preserved for display but never affects the
//! execution hash; identities are sorted before hashing.

use crate::trait_::Tool;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool with this name is already registered
    AlreadyRegistered {
        /// The contested name
        name: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered { name } => write!(f, "Tool already registered: {}", name),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Registry of callable tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered { name });
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Sorted `name@version` identities, the registry's contribution to
    /// the execution hash
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .tools
            .values()
            .map(|tool| format!("{}@{}", tool.name(), tool.version()))
            .collect();
        identities.sort();
        identities
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trait_::{ToolError, ToolOutput};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        async fn invoke(&self, args: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::new(args))
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("search"))).unwrap();

        assert!(registry.get("search").is_some());
        assert!(registry.get("other").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("search"))).unwrap();

        let err = registry.register(Arc::new(NamedTool("search"))).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyRegistered {
                name: "search".to_string()
            }
        );
    }

    #[test]
    fn test_identities_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("zeta"))).unwrap();
        registry.register(Arc::new(NamedTool("alpha"))).unwrap();

        assert_eq!(
            registry.identities(),
            vec!["alpha@1".to_string(), "zeta@1".to_string()]
        );
    }
}
