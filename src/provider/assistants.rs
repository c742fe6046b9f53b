//! Assistants-style HTTP provider.
//!
//! Talks to an OpenAI-compatible Assistants v2 API: threads are conversations,
//! assistants are capabilities, and each request is a run that is polled until it
//! reaches a terminal status.

use super::{
    CapabilityId, CompletionProvider, ConversationHandle, Credential, GenerateRequest,
    Generation, ProviderFactory, RunStatus,
};
use crate::error::ProviderError;
use crate::types::Extras;
use async_trait::async_trait;
use reqwest::{multipart, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Message posted alongside an uploaded requirements file.
const ATTACHMENT_INSTRUCTION: &str = "Generate process with attached file as requirements";

/// Connection and polling settings for the Assistants API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// API root, e.g. https://api.openai.com/v1
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the credential
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Delay between run status polls (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on waiting for one run to finish (seconds)
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Per-request HTTP timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// HTTP connect timeout (seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_run_timeout_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            poll_interval_ms: default_poll_interval_ms(),
            run_timeout_secs: default_run_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ProviderSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!(
                "base_url must start with http:// or https://: {}",
                self.base_url
            ));
        }
        if self.api_key_env.trim().is_empty() {
            return Err("api_key_env cannot be empty".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than zero".to_string());
        }
        if self.run_timeout() < self.poll_interval() {
            return Err("run_timeout_secs must not be shorter than poll_interval_ms".to_string());
        }
        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err("HTTP timeouts must be greater than zero".to_string());
        }
        Ok(())
    }

    fn build_http_client(&self) -> Result<Client, ProviderError> {
        Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Other(format!("Failed to create HTTP client: {}", e)))
    }
}

// Assistants API response structures
#[derive(Debug, Deserialize)]
struct ObjectRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    id: String,
    status: RunStatus,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    role: String,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageContent {
    Text {
        text: TextContent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

/// Render extras as `key=value` lines, or `None` when there are none.
fn format_extras(extras: &Extras) -> Option<String> {
    if extras.is_empty() {
        return None;
    }
    Some(
        extras
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect(),
    )
}

/// Text of the first assistant-authored message, newest first as listed.
fn first_assistant_text(messages: &MessageList) -> Option<String> {
    messages
        .data
        .iter()
        .filter(|message| message.role == "assistant")
        .flat_map(|message| message.content.iter())
        .find_map(|content| match content {
            MessageContent::Text { text } => Some(text.value.clone()),
            MessageContent::Other => None,
        })
}

fn map_http_error(error: reqwest::Error) -> ProviderError {
    if let Some(status) = error.status() {
        map_status_error(status.as_u16(), error.to_string())
    } else if error.is_timeout() {
        ProviderError::RequestFailed(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ProviderError::RequestFailed(format!("Connection error: {}", error))
    } else {
        ProviderError::Other(format!("HTTP error: {}", error))
    }
}

fn map_status_error(status: u16, body: String) -> ProviderError {
    match status {
        401 => ProviderError::AuthFailed(format!("Authentication failed: {}", body)),
        429 => ProviderError::RateLimit(format!("Rate limit exceeded: {}", body)),
        404 => ProviderError::NotFound(body),
        _ => ProviderError::RequestFailed(format!(
            "Request failed with status {}: {}",
            status, body
        )),
    }
}

/// Provider bound to one assistant.
pub struct AssistantsClient {
    client: Client,
    credential: Credential,
    capability: CapabilityId,
    base_url: String,
    poll_interval: Duration,
    run_timeout: Duration,
}

impl AssistantsClient {
    pub fn new(
        credential: Credential,
        capability: CapabilityId,
        settings: &ProviderSettings,
    ) -> Result<Self, ProviderError> {
        let client = settings.build_http_client()?;
        Ok(Self::with_client(client, credential, capability, settings))
    }

    /// Reuse an existing HTTP client (connection pool).
    pub fn with_client(
        client: Client,
        credential: Credential,
        capability: CapabilityId,
        settings: &ProviderSettings,
    ) -> Self {
        Self {
            client,
            credential,
            capability,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            poll_interval: settings.poll_interval(),
            run_timeout: settings.run_timeout(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(self.credential.expose())
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ProviderError> {
        let response = builder.send().await.map_err(map_http_error)?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_status_error(status.as_u16(), error_text));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn create_thread(&self) -> Result<ConversationHandle, ProviderError> {
        let thread: ObjectRef = self
            .send(self.request(Method::POST, "threads").json(&json!({})))
            .await?;
        Ok(ConversationHandle::new(thread.id))
    }

    async fn retrieve_thread(&self, thread: &ConversationHandle) -> Result<(), ProviderError> {
        let _: ObjectRef = self
            .send(self.request(Method::GET, &format!("threads/{}", thread)))
            .await?;
        Ok(())
    }

    async fn delete_thread(&self, thread: &ConversationHandle) -> Result<(), ProviderError> {
        let _: ObjectRef = self
            .send(self.request(Method::DELETE, &format!("threads/{}", thread)))
            .await?;
        Ok(())
    }

    async fn post_message(
        &self,
        thread: &ConversationHandle,
        content: &str,
        file_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        let mut body = json!({ "role": "user", "content": content });
        if let Some(file_id) = file_id {
            body["attachments"] = json!([
                { "file_id": file_id, "tools": [{ "type": "file_search" }] }
            ]);
        }
        let _: ObjectRef = self
            .send(
                self.request(Method::POST, &format!("threads/{}/messages", thread))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn upload_file(&self, path: &Path) -> Result<String, ProviderError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ProviderError::Attachment {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let form = multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", multipart::Part::bytes(bytes).file_name(file_name));
        let file: ObjectRef = self
            .send(self.request(Method::POST, "files").multipart(form))
            .await?;
        debug!(file_id = %file.id, path = %path.display(), "Uploaded attachment");
        Ok(file.id)
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), ProviderError> {
        let _: ObjectRef = self
            .send(self.request(Method::DELETE, &format!("files/{}", file_id)))
            .await?;
        Ok(())
    }

    async fn get_run(&self, thread: &ConversationHandle, run_id: &str) -> Result<Run, ProviderError> {
        self.send(self.request(Method::GET, &format!("threads/{}/runs/{}", thread, run_id)))
            .await
    }

    /// Poll until the run is terminal or the run timeout expires.
    async fn wait_for_run(&self, thread: &ConversationHandle, run: Run) -> Result<Run, ProviderError> {
        let poll = async move {
            let mut run = run;
            while !run.status.is_terminal() {
                tokio::time::sleep(self.poll_interval).await;
                run = self.get_run(thread, &run.id).await?;
                debug!(
                    conversation = %thread,
                    run_id = %run.id,
                    status = %run.status,
                    "Polled run"
                );
            }
            Ok::<Run, ProviderError>(run)
        };
        tokio::time::timeout(self.run_timeout, poll)
            .await
            .map_err(|_| ProviderError::Timeout(self.run_timeout))?
    }

    /// Start a run of this assistant on the thread and return its reply.
    async fn run_and_read_reply(&self, thread: &ConversationHandle) -> Result<String, ProviderError> {
        let run: Run = self
            .send(
                self.request(Method::POST, &format!("threads/{}/runs", thread))
                    .json(&json!({ "assistant_id": self.capability.as_str() })),
            )
            .await?;
        let run = self.wait_for_run(thread, run).await?;

        if !run.status.is_completed() {
            let (code, message) = run
                .last_error
                .as_ref()
                .map(|e| (e.code.clone(), e.message.clone()))
                .unwrap_or((None, None));
            warn!(
                conversation = %thread,
                run_id = %run.id,
                status = %run.status,
                error_code = ?code,
                error_message = ?message,
                "Run did not complete"
            );
            return Err(ProviderError::Incomplete { status: run.status });
        }

        let messages: MessageList = self
            .send(
                self.request(Method::GET, &format!("threads/{}/messages", thread))
                    .query(&[("order", "desc"), ("run_id", run.id.as_str())]),
            )
            .await?;
        first_assistant_text(&messages).ok_or(ProviderError::EmptyReply)
    }

    async fn submit_and_reply(
        &self,
        thread: &ConversationHandle,
        request: GenerateRequest<'_>,
    ) -> Result<String, ProviderError> {
        if let Some(instructions) = format_extras(request.extras) {
            self.post_message(thread, &instructions, None).await?;
        }
        if !request.prompt.trim().is_empty() || request.attachment.is_none() {
            self.post_message(thread, request.prompt, None).await?;
        }

        let Some(path) = request.attachment else {
            return self.run_and_read_reply(thread).await;
        };

        // The uploaded file lives only for this call.
        let file_id = self.upload_file(path).await?;
        let outcome = async {
            self.post_message(thread, ATTACHMENT_INSTRUCTION, Some(&file_id))
                .await?;
            self.run_and_read_reply(thread).await
        }
        .await;
        if let Err(err) = self.delete_file(&file_id).await {
            warn!(file_id = %file_id, error = %err, "Failed to delete uploaded attachment");
        }
        outcome
    }

    async fn release_thread(&self, thread: &ConversationHandle) {
        match self.delete_thread(thread).await {
            Ok(()) => debug!(conversation = %thread, "Released conversation"),
            Err(err) => {
                warn!(conversation = %thread, error = %err, "Failed to release conversation")
            }
        }
    }
}

#[async_trait]
impl CompletionProvider for AssistantsClient {
    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation, ProviderError> {
        let thread = self.create_thread().await?;
        info!(
            capability = %self.capability,
            conversation = %thread,
            extras = request.extras.len(),
            attachment = request.attachment.is_some(),
            "Started conversation"
        );

        match self.submit_and_reply(&thread, request).await {
            Ok(text) => Ok(Generation {
                text,
                conversation: thread,
            }),
            Err(err) => {
                // Nobody can continue a conversation whose first run failed.
                self.release_thread(&thread).await;
                Err(err)
            }
        }
    }

    async fn continue_conversation(
        &self,
        conversation: &ConversationHandle,
    ) -> Result<String, ProviderError> {
        let outcome = async {
            self.retrieve_thread(conversation).await?;
            info!(
                capability = %self.capability,
                conversation = %conversation,
                "Continuing conversation"
            );
            self.run_and_read_reply(conversation).await
        }
        .await;
        self.release_thread(conversation).await;
        outcome
    }

    fn capability(&self) -> &CapabilityId {
        &self.capability
    }
}

/// Factory producing `AssistantsClient`s that share one HTTP connection pool.
pub struct AssistantsFactory {
    client: Client,
    settings: ProviderSettings,
}

impl AssistantsFactory {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        let client = settings.build_http_client()?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }
}

impl ProviderFactory for AssistantsFactory {
    fn connect(
        &self,
        credential: &Credential,
        capability: &CapabilityId,
    ) -> Result<Box<dyn CompletionProvider>, ProviderError> {
        Ok(Box::new(AssistantsClient::with_client(
            self.client.clone(),
            credential.clone(),
            capability.clone(),
            &self.settings,
        )))
    }
}
