//! Generation tasks.
//!
//! A task drives one job through two dependent remote calls and a merge:
//!
//! 1. a fresh conversation on the process capability produces the process text,
//! 2. the graphic capability continues that conversation to produce the diagram,
//! 3. the merger combines both texts into the output document.
//!
//! Each step is preceded by a status write, so an observer polling `get_status`
//! sees where the task is and, after a failure, where it stopped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::TaskError;
use crate::merge::Merger;
use crate::provider::{CapabilityRegistry, Credential, GenerateRequest, ProviderFactory, Role};
use crate::types::{Extras, TaskId};

pub mod status;
pub mod store;

pub use status::{Phase, StatusCell, TaskStatus};
pub use store::{MemoryStatusStore, SledStatusStore, StatusStore};

/// External collaborators a task run calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub providers: Arc<dyn ProviderFactory>,
    pub merger: Arc<dyn Merger>,
}

impl Collaborators {
    pub fn new(providers: Arc<dyn ProviderFactory>, merger: Arc<dyn Merger>) -> Self {
        Self { providers, merger }
    }
}

/// One unit of work producing a single merged document from a prompt.
pub struct Task {
    id: TaskId,
    prompt: String,
    attachment: Option<PathBuf>,
    extras: Extras,
    created_at: DateTime<Utc>,
    started: AtomicBool,
    status: StatusCell,
}

impl Task {
    /// Create a task with its own in-memory status store.
    pub fn new(
        prompt: impl Into<String>,
        attachment: Option<PathBuf>,
        extras: Option<Extras>,
    ) -> Result<Self, TaskError> {
        Self::with_store(MemoryStatusStore::shared(), prompt, attachment, extras)
    }

    /// Create a task whose status lives in `store`, so anything holding the same
    /// store can read it by id.
    pub fn with_store(
        store: Arc<dyn StatusStore>,
        prompt: impl Into<String>,
        attachment: Option<PathBuf>,
        extras: Option<Extras>,
    ) -> Result<Self, TaskError> {
        let id = TaskId::new();
        let status = StatusCell::create(id, store)?;
        debug!(task_id = %id, "Created task");
        Ok(Self {
            id,
            prompt: prompt.into(),
            attachment,
            extras: extras.unwrap_or_default(),
            created_at: Utc::now(),
            started: AtomicBool::new(false),
            status,
        })
    }

    pub fn get_id(&self) -> TaskId {
        self.id
    }

    /// Current status. Reads the store directly and never waits on `run`.
    pub fn get_status(&self) -> Result<TaskStatus, TaskError> {
        self.status.get()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn attachment(&self) -> Option<&Path> {
        self.attachment.as_deref()
    }

    pub fn extras(&self) -> &Extras {
        &self.extras
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Run the full pipeline and return the merged document.
    ///
    /// A task runs at most once. On failure the status stays at the phase that
    /// failed; it is neither rolled back nor advanced.
    pub async fn run(
        &self,
        credential: &Credential,
        capabilities: &CapabilityRegistry,
        collaborators: &Collaborators,
    ) -> Result<String, TaskError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(TaskError::AlreadyStarted(self.id));
        }

        let result = self.execute(credential, capabilities, collaborators).await;
        match &result {
            Ok(document) => info!(
                task_id = %self.id,
                document_len = document.len(),
                "Task completed"
            ),
            Err(err) => warn!(
                task_id = %self.id,
                status = ?self.status.get().ok(),
                error = %err,
                "Task failed"
            ),
        }
        result
    }

    async fn execute(
        &self,
        credential: &Credential,
        capabilities: &CapabilityRegistry,
        collaborators: &Collaborators,
    ) -> Result<String, TaskError> {
        self.status.advance(TaskStatus::Running)?;
        info!(task_id = %self.id, "Task running");

        // Each provider is connected after its phase is recorded, so a failed
        // connect leaves the status at the phase named in the error.
        self.status.advance(TaskStatus::GeneratingProcess)?;
        let process_generator = collaborators
            .providers
            .connect(credential, capabilities.get(Role::ProcessGenerator))
            .map_err(|e| TaskError::provider(Phase::Process, e))?;
        debug!(
            task_id = %self.id,
            capability = %process_generator.capability(),
            "Generating process"
        );
        let process = process_generator
            .generate(GenerateRequest {
                prompt: &self.prompt,
                attachment: self.attachment.as_deref(),
                extras: &self.extras,
            })
            .await
            .map_err(|e| TaskError::provider(Phase::Process, e))?;

        self.status.advance(TaskStatus::GeneratingGraphic)?;
        let graphic_generator = collaborators
            .providers
            .connect(credential, capabilities.get(Role::GraphicGenerator))
            .map_err(|e| TaskError::provider(Phase::Graphic, e))?;
        debug!(
            task_id = %self.id,
            capability = %graphic_generator.capability(),
            conversation = %process.conversation,
            "Generating graphic"
        );
        let graphic = graphic_generator
            .continue_conversation(&process.conversation)
            .await
            .map_err(|e| TaskError::provider(Phase::Graphic, e))?;

        self.status.advance(TaskStatus::Sculpting)?;
        let document = collaborators.merger.merge(&process.text, &graphic)?;

        self.status.advance(TaskStatus::Completed)?;
        Ok(document)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("prompt", &self.prompt)
            .field("attachment", &self.attachment)
            .field("extras", &self.extras)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
