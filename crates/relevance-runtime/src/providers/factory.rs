//! Backend factory pattern for selecting a backend by name.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = BackendRegistry::with_defaults();
//! let backend = registry.create("local", &serde_json::json!({"base_url": "http://gpu-box:11434"}))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

use super::{LlmBackend, SetupError};

/// Creates backends of one type from JSON configuration.
pub trait BackendFactory: Send + Sync {
    /// Unique identifier for this backend type, e.g. "cloud" or "local".
    fn backend_type(&self) -> &'static str;

    /// Create a backend instance from configuration.
    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmBackend>, SetupError>;

    /// Validate configuration without creating a backend.
    fn validate_config(&self, config: &JsonValue) -> Result<(), SetupError>;

    /// Defaults for optional fields.
    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    fn description(&self) -> &'static str {
        "LLM backend"
    }
}

/// Registry of available backend factories.
#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any with the same type.
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) {
        self.factories
            .insert(factory.backend_type().to_string(), factory);
    }

    /// Create a backend from type name and configuration.
    pub fn create(
        &self,
        backend_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmBackend>, SetupError> {
        self.factory(backend_type)?.create(config)
    }

    /// Validate configuration for a backend type.
    pub fn validate(&self, backend_type: &str, config: &JsonValue) -> Result<(), SetupError> {
        self.factory(backend_type)?.validate_config(config)
    }

    fn factory(&self, backend_type: &str) -> Result<&Arc<dyn BackendFactory>, SetupError> {
        self.factories
            .get(backend_type)
            .ok_or_else(|| SetupError::UnknownBackend {
                name: backend_type.to_string(),
                available: self.available_types().into_iter().map(String::from).collect(),
            })
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_backend(&self, backend_type: &str) -> bool {
        self.factories.contains_key(backend_type)
    }

    pub fn default_config(&self, backend_type: &str) -> Option<JsonValue> {
        self.factories
            .get(backend_type)
            .map(|f| f.default_config())
    }

    /// Create a registry with every compiled-in backend registered.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "cloud")]
        registry.register(Arc::new(super::CloudBackendFactory));
        #[cfg(feature = "local")]
        registry.register(Arc::new(super::LocalBackendFactory));
        registry
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.available_types())
            .finish()
    }
}

/// Read `timeout_ms` from backend config.
#[cfg_attr(not(any(feature = "cloud", feature = "local")), allow(dead_code))]
pub(super) fn timeout_from_config(config: &JsonValue, default: Duration) -> Duration {
    config["timeout_ms"]
        .as_u64()
        .map(Duration::from_millis)
        .unwrap_or(default)
}
