//! Completion Provider Abstraction
//!
//! The remote conversational service seen through two operations: start a
//! conversation and generate a reply, then continue that same conversation under a
//! different capability. Providers are bound to one capability each and created
//! through a `ProviderFactory`, so the task pipeline never touches transport
//! details.

use crate::error::{ConfigError, ProviderError};
use crate::types::Extras;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

pub mod assistants;

pub use assistants::{AssistantsClient, AssistantsFactory, ProviderSettings};

/// Access credential for the remote service.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Read the credential from an environment variable.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Ok(Self(value)),
            _ => Err(ConfigError::MissingCredential(var.to_string())),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Logical role a capability plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    ProcessGenerator,
    GraphicGenerator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::ProcessGenerator => "PROCESS_GENERATOR",
            Role::GraphicGenerator => "GRAPHIC_GENERATOR",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-specific capability (assistant) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(String);

impl CapabilityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed two-entry mapping from pipeline role to capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRegistry {
    #[serde(rename = "PROCESS_GENERATOR", alias = "process_generator")]
    process_generator: CapabilityId,
    #[serde(rename = "GRAPHIC_GENERATOR", alias = "graphic_generator")]
    graphic_generator: CapabilityId,
}

impl CapabilityRegistry {
    pub fn new(process_generator: CapabilityId, graphic_generator: CapabilityId) -> Self {
        Self {
            process_generator,
            graphic_generator,
        }
    }

    /// Build from a string map keyed by role name; both roles are required.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let lookup = |role: Role| {
            map.get(role.as_str())
                .filter(|id| !id.trim().is_empty())
                .map(|id| CapabilityId::new(id.clone()))
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("Missing capability for role {}", role))
                })
        };
        Ok(Self::new(
            lookup(Role::ProcessGenerator)?,
            lookup(Role::GraphicGenerator)?,
        ))
    }

    pub fn get(&self, role: Role) -> &CapabilityId {
        match role {
            Role::ProcessGenerator => &self.process_generator,
            Role::GraphicGenerator => &self.graphic_generator,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for role in [Role::ProcessGenerator, Role::GraphicGenerator] {
            if self.get(role).as_str().trim().is_empty() {
                return Err(format!("Capability for role {} cannot be empty", role));
            }
        }
        Ok(())
    }
}

/// Handle identifying a remote conversation for continuation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHandle(String);

impl ConversationHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status the remote service reports for one run inside a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
        }
    }

    /// Polling stops at these. `RequiresAction` counts because nothing here
    /// submits tool outputs.
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling
        )
    }

    pub fn is_completed(self) -> bool {
        self == RunStatus::Completed
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for the first call of a task: a fresh conversation.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub attachment: Option<&'a Path>,
    pub extras: &'a Extras,
}

/// Reply from a fresh conversation plus the handle to continue it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub conversation: ConversationHandle,
}

/// Completion provider bound to a single capability.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Start a new conversation, submit the request, and wait for the reply.
    ///
    /// Fails with `ProviderError::Incomplete` when the remote run ends in any
    /// status other than completed.
    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation, ProviderError>;

    /// Run this capability on an existing conversation and return its reply.
    ///
    /// The provider releases the conversation once this call concludes; callers
    /// must not reuse the handle afterwards.
    async fn continue_conversation(
        &self,
        conversation: &ConversationHandle,
    ) -> Result<String, ProviderError>;

    /// Capability this provider is bound to.
    fn capability(&self) -> &CapabilityId;
}

/// Creates providers bound to a capability.
pub trait ProviderFactory: Send + Sync {
    fn connect(
        &self,
        credential: &Credential,
        capability: &CapabilityId,
    ) -> Result<Box<dyn CompletionProvider>, ProviderError>;
}
