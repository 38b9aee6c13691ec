//! Provider abstraction
//!
//! The [`Provider`] trait is the only way the engine touches real
//! infrastructure, allowing for different implementations (a container
//! runtime CLI, a mock for testing).

use crate::error::ProviderError;
use crate::types::{Outputs, Resource, ResourceState};
use serde_json::Value;
use std::collections::BTreeMap;

/// Outputs of the resources a call depends on, keyed by resource name
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    outputs: BTreeMap<String, Outputs>,
}

impl Dependencies {
    pub fn new(outputs: BTreeMap<String, Outputs>) -> Self {
        Self { outputs }
    }

    pub fn get(&self, resource: &str) -> Option<&Outputs> {
        self.outputs.get(resource)
    }

    /// String output of a dependency, or a fatal error if it is missing
    pub fn output_str(&self, resource: &str, key: &str) -> Result<&str, ProviderError> {
        self.outputs
            .get(resource)
            .and_then(|o| o.get(key))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::fatal(format!("dependency '{resource}' has no output '{key}'"))
            })
    }

    /// Provider id of a dependency
    pub fn id(&self, resource: &str) -> Result<&str, ProviderError> {
        self.output_str(resource, "id")
    }
}

/// Capability that creates, updates and deletes resources
///
/// Implementations must be safe to call from several worker threads at once;
/// the scheduler never calls them concurrently for the same resource.
pub trait Provider: Send + Sync {
    /// Create a resource; the returned outputs must contain a string `id`
    fn create(&self, resource: &Resource, deps: &Dependencies) -> Result<Outputs, ProviderError>;

    /// Update a resource in place
    ///
    /// Return [`ProviderError::ImmutableConflict`] when the change cannot be
    /// made in place; the scheduler then deletes and re-creates it.
    fn update(
        &self,
        current: &ResourceState,
        desired: &Resource,
        deps: &Dependencies,
    ) -> Result<Outputs, ProviderError>;

    /// Delete a resource
    fn delete(&self, current: &ResourceState) -> Result<(), ProviderError>;
}

/// Pull the provider id out of create/update outputs
pub(crate) fn id_from_outputs(outputs: &Outputs) -> Result<String, ProviderError> {
    outputs
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::fatal("provider returned no id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_lookup() {
        let deps = Dependencies::new(BTreeMap::from([(
            "img".to_string(),
            Outputs::from([("id".to_string(), Value::String("sha256:1".into()))]),
        )]));
        assert_eq!(deps.id("img").unwrap(), "sha256:1");
        assert!(matches!(deps.id("net"), Err(ProviderError::Fatal(_))));
        assert!(deps.output_str("img", "name").is_err());
    }

    #[test]
    fn test_id_from_outputs_requires_id() {
        assert!(id_from_outputs(&Outputs::new()).is_err());
        let outputs = Outputs::from([("id".to_string(), Value::String("x".into()))]);
        assert_eq!(id_from_outputs(&outputs).unwrap(), "x");
    }
}
