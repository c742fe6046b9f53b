//! Configuration System
//!
//! Hierarchical configuration for the generation service: provider transport
//! settings, the role-to-capability registry, worker pool size, status store
//! backend and logging. Sources merge in order defaults, global file, workspace
//! files, environment.

use crate::error::{ConfigError, StorageError};
use crate::logging::LoggingConfig;
use crate::processor::ProcessorConfig;
use crate::provider::{CapabilityRegistry, Credential, ProviderSettings};
use crate::task::{MemoryStatusStore, SledStatusStore, StatusStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForgeConfig {
    /// Remote service settings
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Capability per pipeline role; required to run tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilityRegistry>,

    /// Worker pool settings
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Where task status lives
    #[serde(default)]
    pub status: StatusConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Status store backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBackend {
    /// Process-local map; status disappears with the process
    #[default]
    Memory,
    /// sled database at `status.path`
    Sled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub backend: StatusBackend,

    /// Database directory for the sled backend; a temporary database when unset.
    /// Ignored by the memory backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StatusConfig {
    pub fn validate(&self) -> Result<(), String> {
        match (self.backend, &self.path) {
            (StatusBackend::Sled, Some(path)) if path.as_os_str().is_empty() => {
                Err("Status path cannot be empty".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Open the configured backend.
    pub fn open_store(&self) -> Result<Arc<dyn StatusStore>, StorageError> {
        match (self.backend, &self.path) {
            (StatusBackend::Memory, _) => Ok(MemoryStatusStore::shared()),
            (StatusBackend::Sled, Some(path)) => Ok(Arc::new(SledStatusStore::open(path)?)),
            (StatusBackend::Sled, None) => Ok(Arc::new(SledStatusStore::temporary()?)),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Provider(String),
    Capabilities(String),
    Processor(String),
    Status(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ValidationError::Capabilities(msg) => write!(f, "Capabilities: {}", msg),
            ValidationError::Processor(msg) => write!(f, "Processor: {}", msg),
            ValidationError::Status(msg) => write!(f, "Status: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ForgeConfig {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.provider.validate() {
            errors.push(ValidationError::Provider(e));
        }

        match &self.capabilities {
            Some(registry) => {
                if let Err(e) = registry.validate() {
                    errors.push(ValidationError::Capabilities(e));
                }
            }
            None => errors.push(ValidationError::Capabilities(
                "PROCESS_GENERATOR and GRAPHIC_GENERATOR must be configured".to_string(),
            )),
        }

        if let Err(e) = self.processor.validate() {
            errors.push(ValidationError::Processor(e));
        }
        if let Err(e) = self.status.validate() {
            errors.push(ValidationError::Status(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn capabilities(&self) -> Result<&CapabilityRegistry, ConfigError> {
        self.capabilities
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("capabilities are not configured".to_string()))
    }

    /// Credential read from the environment variable named by `provider.api_key_env`.
    pub fn credential(&self) -> Result<Credential, ConfigError> {
        Credential::from_env(&self.provider.api_key_env)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
