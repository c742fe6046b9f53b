//! Shared doubles for integration tests
//!
//! `RecordingFactory` hands out providers that record every call into a shared
//! log and reply deterministically from their input, so concurrent tasks can be
//! told apart by their documents.

use async_trait::async_trait;
use bpmn_forge::provider::ProviderFactory;
use bpmn_forge::{
    CapabilityId, CapabilityRegistry, Collaborators, CompletionProvider, ConversationHandle,
    Credential, Extras, GenerateRequest, Generation, MergeError, ProviderError, RunStatus,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const PROCESS_CAPABILITY: &str = "asst_process";
pub const GRAPHIC_CAPABILITY: &str = "asst_graphic";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Generate {
        capability: String,
        prompt: String,
        attachment: Option<PathBuf>,
        extras: Extras,
    },
    Continue {
        capability: String,
        conversation: String,
    },
}

/// Behaviour shared by every provider a factory hands out.
#[derive(Default)]
pub struct Script {
    pub generate_fails_with: Option<RunStatus>,
    pub continue_fails_with: Option<RunStatus>,
    /// `generate` waits for a permit when set
    pub gate: Option<Arc<Semaphore>>,
    /// Delay inside each remote call
    pub latency: Option<Duration>,
    pub calls: Mutex<Vec<Call>>,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Script {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Highest number of `generate` calls observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

pub struct RecordingProvider {
    capability: CapabilityId,
    script: Arc<Script>,
}

#[async_trait]
impl CompletionProvider for RecordingProvider {
    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation, ProviderError> {
        self.script.calls.lock().push(Call::Generate {
            capability: self.capability.to_string(),
            prompt: request.prompt.to_string(),
            attachment: request.attachment.map(|p| p.to_path_buf()),
            extras: request.extras.clone(),
        });

        let running = self.script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(gate) = &self.script.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.script.pause().await;
        self.script.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(status) = self.script.generate_fails_with {
            return Err(ProviderError::Incomplete { status });
        }
        Ok(Generation {
            text: format!("process({})", request.prompt),
            conversation: ConversationHandle::new(format!("thread-{}", request.prompt)),
        })
    }

    async fn continue_conversation(
        &self,
        conversation: &ConversationHandle,
    ) -> Result<String, ProviderError> {
        self.script.calls.lock().push(Call::Continue {
            capability: self.capability.to_string(),
            conversation: conversation.to_string(),
        });
        self.script.pause().await;

        if let Some(status) = self.script.continue_fails_with {
            return Err(ProviderError::Incomplete { status });
        }
        Ok(format!("graphic({})", conversation))
    }

    fn capability(&self) -> &CapabilityId {
        &self.capability
    }
}

pub struct RecordingFactory {
    pub script: Arc<Script>,
}

impl ProviderFactory for RecordingFactory {
    fn connect(
        &self,
        _credential: &Credential,
        capability: &CapabilityId,
    ) -> Result<Box<dyn CompletionProvider>, ProviderError> {
        Ok(Box::new(RecordingProvider {
            capability: capability.clone(),
            script: self.script.clone(),
        }))
    }
}

/// Merger that joins both texts and records what it was given.
#[derive(Default)]
pub struct RecordingMerger {
    pub fail: bool,
    pub merged: Mutex<Vec<(String, String)>>,
}

impl bpmn_forge::Merger for RecordingMerger {
    fn merge(&self, process: &str, graphic: &str) -> Result<String, MergeError> {
        self.merged
            .lock()
            .push((process.to_string(), graphic.to_string()));
        if self.fail {
            return Err(MergeError("unbalanced sequence flows".to_string()));
        }
        Ok(format!("{process}+{graphic}"))
    }
}

pub fn registry() -> CapabilityRegistry {
    CapabilityRegistry::new(
        CapabilityId::new(PROCESS_CAPABILITY),
        CapabilityId::new(GRAPHIC_CAPABILITY),
    )
}

pub fn credential() -> Credential {
    Credential::new("sk-test")
}

pub fn collaborators(script: Script, merger: RecordingMerger) -> (Collaborators, Arc<Script>, Arc<RecordingMerger>) {
    let script = Arc::new(script);
    let merger = Arc::new(merger);
    let collaborators = Collaborators::new(
        Arc::new(RecordingFactory {
            script: script.clone(),
        }),
        merger.clone(),
    );
    (collaborators, script, merger)
}
