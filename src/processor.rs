//! Task Processor
//!
//! Worker pool for generation tasks. Submitted tasks run as tokio tasks, with a
//! semaphore bounding how many pipelines are in flight at once. Status stays
//! readable by task id for as long as the processor tracks the task.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ForgeConfig;
use crate::error::{ConfigError, TaskError};
use crate::merge::Merger;
use crate::provider::{AssistantsFactory, CapabilityRegistry, Credential};
use crate::task::{Collaborators, StatusStore, Task, TaskStatus};
use crate::types::{Extras, TaskId};

type TaskResult = Result<String, TaskError>;

/// Join handle of a submitted task; `None` once its result has been taken.
type ResultSlot = Arc<Mutex<Option<JoinHandle<TaskResult>>>>;

/// Configuration for the worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Maximum number of tasks running at once
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    4
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Processor statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Submitted tasks waiting for a worker
    pub pending: usize,
    /// Tasks currently running
    pub running: usize,
    /// Tasks that returned a document
    pub completed: usize,
    /// Tasks that returned an error
    pub failed: usize,
}

struct TaskEntry {
    task: Arc<Task>,
    result: ResultSlot,
}

impl TaskEntry {
    /// Result still available to `wait`. A slot locked by a pending `wait` counts.
    fn has_result(&self) -> bool {
        self.result
            .try_lock()
            .map(|slot| slot.is_some())
            .unwrap_or(true)
    }

    fn is_finished(&self) -> bool {
        self.result
            .try_lock()
            .map(|slot| slot.as_ref().map_or(true, |handle| handle.is_finished()))
            .unwrap_or(false)
    }
}

/// Runs tasks concurrently and tracks them by id.
pub struct TaskProcessor {
    config: ProcessorConfig,
    credential: Arc<Credential>,
    capabilities: Arc<CapabilityRegistry>,
    collaborators: Collaborators,
    store: Arc<dyn StatusStore>,
    permits: Arc<Semaphore>,
    tasks: Arc<RwLock<HashMap<TaskId, TaskEntry>>>,
    stats: Arc<RwLock<ProcessorStats>>,
}

impl TaskProcessor {
    pub fn new(
        config: ProcessorConfig,
        credential: Credential,
        capabilities: CapabilityRegistry,
        collaborators: Collaborators,
        store: Arc<dyn StatusStore>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            config,
            credential: Arc::new(credential),
            capabilities: Arc::new(capabilities),
            collaborators,
            store,
            permits,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ProcessorStats::default())),
        }
    }

    /// Build a processor backed by the Assistants HTTP provider.
    ///
    /// Validates the configuration, resolves the credential from the environment
    /// and opens the configured status store.
    pub fn from_config(config: &ForgeConfig, merger: Arc<dyn Merger>) -> Result<Self, ConfigError> {
        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ConfigError::Invalid(error_msgs.join("\n"))
        })?;
        let capabilities = config.capabilities()?.clone();
        let credential = config.credential()?;
        let store = config.status.open_store()?;
        let providers = AssistantsFactory::new(config.provider.clone())?;

        info!(
            workers = config.processor.workers,
            backend = ?config.status.backend,
            base_url = %config.provider.base_url,
            "Task processor configured"
        );
        Ok(Self::new(
            config.processor.clone(),
            credential,
            capabilities,
            Collaborators::new(Arc::new(providers), merger),
            store,
        ))
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Create a task whose status lives in this processor's store.
    pub fn create_task(
        &self,
        prompt: impl Into<String>,
        attachment: Option<PathBuf>,
        extras: Option<Extras>,
    ) -> Result<Arc<Task>, TaskError> {
        Ok(Arc::new(Task::with_store(
            self.store.clone(),
            prompt,
            attachment,
            extras,
        )?))
    }

    /// Dispatch a task to the worker pool. Must be called within a tokio runtime.
    pub fn submit(&self, task: Arc<Task>) -> Result<TaskId, TaskError> {
        let id = task.get_id();
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&id) {
            return Err(TaskError::AlreadySubmitted(id));
        }

        self.stats.write().pending += 1;
        let handle = tokio::spawn(Self::work(
            task.clone(),
            self.permits.clone(),
            self.credential.clone(),
            self.capabilities.clone(),
            self.collaborators.clone(),
            self.stats.clone(),
        ));
        tasks.insert(
            id,
            TaskEntry {
                task,
                result: Arc::new(Mutex::new(Some(handle))),
            },
        );
        let tracked = tasks.len();
        drop(tasks);

        debug!(task_id = %id, tracked, "Submitted task");
        Ok(id)
    }

    async fn work(
        task: Arc<Task>,
        permits: Arc<Semaphore>,
        credential: Arc<Credential>,
        capabilities: Arc<CapabilityRegistry>,
        collaborators: Collaborators,
        stats: Arc<RwLock<ProcessorStats>>,
    ) -> TaskResult {
        let id = task.get_id();
        let permit = match permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let mut stats = stats.write();
                stats.pending -= 1;
                stats.failed += 1;
                return Err(TaskError::WorkerFailed {
                    id,
                    reason: "worker pool closed".to_string(),
                });
            }
        };
        {
            let mut stats = stats.write();
            stats.pending -= 1;
            stats.running += 1;
        }

        let result = AssertUnwindSafe(task.run(&credential, &capabilities, &collaborators))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let reason = panic_message(panic.as_ref());
                error!(task_id = %id, reason = %reason, "Task panicked");
                Err(TaskError::WorkerFailed { id, reason })
            });
        drop(permit);

        let mut stats = stats.write();
        stats.running -= 1;
        if result.is_ok() {
            stats.completed += 1;
        } else {
            stats.failed += 1;
        }
        result
    }

    /// Current status of a task, by id.
    ///
    /// Tracked tasks are read through their own cell; otherwise the processor's
    /// store is consulted, which covers tasks created elsewhere on the same store.
    pub fn get_status(&self, id: TaskId) -> Result<TaskStatus, TaskError> {
        if let Some(entry) = self.tasks.read().get(&id) {
            return entry.task.get_status();
        }
        self.store.get(id)?.ok_or(TaskError::UnknownTask(id))
    }

    /// Wait for a submitted task and take its result. A result can be taken once.
    ///
    /// Cancel-safe: if the returned future is dropped before the task finishes,
    /// the result stays available to a later `wait`.
    pub async fn wait(&self, id: TaskId) -> TaskResult {
        let cell = self
            .tasks
            .read()
            .get(&id)
            .map(|entry| entry.result.clone())
            .ok_or(TaskError::UnknownTask(id))?;

        let mut slot = cell.lock().await;
        let handle = slot.as_mut().ok_or(TaskError::ResultTaken(id))?;
        let joined = handle.await;
        *slot = None;

        joined.map_err(|e| TaskError::WorkerFailed {
            id,
            reason: e.to_string(),
        })?
    }

    /// Wait for every submitted task whose result has not been taken yet.
    pub async fn wait_all(&self) -> Vec<(TaskId, TaskResult)> {
        let ids: Vec<TaskId> = self
            .tasks
            .read()
            .iter()
            .filter(|(_, entry)| entry.has_result())
            .map(|(id, _)| *id)
            .collect();
        let results = join_all(ids.iter().map(|id| self.wait(*id))).await;
        ids.into_iter().zip(results).collect()
    }

    pub fn task(&self, id: TaskId) -> Option<Arc<Task>> {
        self.tasks.read().get(&id).map(|entry| entry.task.clone())
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.read().keys().copied().collect()
    }

    /// Stop tracking a finished task. Its status entry goes away once the last
    /// reference to the task is dropped.
    pub fn forget(&self, id: TaskId) -> Option<Arc<Task>> {
        let mut tasks = self.tasks.write();
        if !tasks.get(&id)?.is_finished() {
            return None;
        }
        tasks.remove(&id).map(|entry| entry.task)
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats.read().clone()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("task panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("task panicked: {}", message)
    } else {
        "task panicked".to_string()
    }
}
