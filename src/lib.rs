//! bpmn-forge: two-phase process diagram generation
//!
//! A task turns a natural-language prompt (optionally with an attached
//! requirements document) into a BPMN document. The process capability of a remote
//! conversational service writes the process, the graphic capability continues the
//! same conversation to lay it out, and a merger combines both replies.
//!
//! Task status is written to a shared `StatusStore` before each step, so callers can
//! poll progress by id while `TaskProcessor` runs many tasks concurrently.

pub mod config;
pub mod error;
pub mod logging;
pub mod merge;
pub mod processor;
pub mod provider;
pub mod task;
pub mod types;

pub use config::{ConfigLoader, ForgeConfig};
pub use error::{ConfigError, MergeError, ProviderError, StorageError, TaskError};
pub use merge::Merger;
pub use processor::{ProcessorConfig, ProcessorStats, TaskProcessor};
pub use provider::{
    CapabilityId, CapabilityRegistry, CompletionProvider, ConversationHandle, Credential,
    GenerateRequest, Generation, ProviderFactory, Role, RunStatus,
};
pub use task::{
    Collaborators, MemoryStatusStore, Phase, SledStatusStore, StatusStore, Task, TaskStatus,
};
pub use types::{ExtraValue, Extras, TaskId};
