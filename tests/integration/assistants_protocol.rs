//! Integration tests for the Assistants HTTP provider
//!
//! A recording Assistants server on a local port checks what the client sends:
//! message order, attachment upload and deletion, and conversation release.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bpmn_forge::provider::{AssistantsClient, ProviderSettings};
use bpmn_forge::{
    CapabilityId, CompletionProvider, ConversationHandle, Credential, ExtraValue, Extras,
    GenerateRequest, ProviderError, RunStatus,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;

const ATTACHMENT_INSTRUCTION: &str = "Generate process with attached file as requirements";

struct FakeAssistants {
    run_status: &'static str,
    reply: Option<&'static str>,
    fail_retrieve: bool,
    requests: Mutex<Vec<String>>,
    /// Posted message contents and whether each carried an attachment
    messages: Mutex<Vec<(String, bool)>>,
}

impl FakeAssistants {
    fn new(run_status: &'static str, reply: Option<&'static str>) -> Self {
        Self {
            run_status,
            reply,
            fail_retrieve: false,
            requests: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, request: String) {
        self.requests.lock().push(request);
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    fn count(&self, request: &str) -> usize {
        self.requests.lock().iter().filter(|r| *r == request).count()
    }
}

type Shared = Arc<FakeAssistants>;

async fn create_thread(State(server): State<Shared>) -> Json<Value> {
    server.record("POST /threads".to_string());
    Json(json!({ "id": "thread_1" }))
}

async fn retrieve_thread(
    State(server): State<Shared>,
    Path(thread): Path<String>,
) -> (StatusCode, Json<Value>) {
    server.record(format!("GET /threads/{thread}"));
    if server.fail_retrieve {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "message": "upstream unavailable" } })),
        );
    }
    (StatusCode::OK, Json(json!({ "id": thread })))
}

async fn delete_thread(State(server): State<Shared>, Path(thread): Path<String>) -> Json<Value> {
    server.record(format!("DELETE /threads/{thread}"));
    Json(json!({ "id": thread, "deleted": true }))
}

async fn post_message(
    State(server): State<Shared>,
    Path(thread): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    server.record(format!("POST /threads/{thread}/messages"));
    let content = body["content"].as_str().unwrap_or_default().to_string();
    let has_attachment = body.get("attachments").is_some();
    server.messages.lock().push((content, has_attachment));
    Json(json!({ "id": "msg_1" }))
}

async fn list_messages(State(server): State<Shared>, Path(thread): Path<String>) -> Json<Value> {
    server.record(format!("GET /threads/{thread}/messages"));
    let data = match server.reply {
        Some(reply) => json!([{
            "role": "assistant",
            "content": [{ "type": "text", "text": { "value": reply } }]
        }]),
        None => json!([]),
    };
    Json(json!({ "data": data }))
}

async fn create_run(
    State(server): State<Shared>,
    Path(thread): Path<String>,
    Json(_body): Json<Value>,
) -> Json<Value> {
    server.record(format!("POST /threads/{thread}/runs"));
    Json(json!({ "id": "run_1", "status": "queued" }))
}

async fn get_run(
    State(server): State<Shared>,
    Path((thread, run)): Path<(String, String)>,
) -> Json<Value> {
    server.record(format!("GET /threads/{thread}/runs/{run}"));
    Json(json!({ "id": run, "status": server.run_status }))
}

async fn upload_file(State(server): State<Shared>, _body: Bytes) -> Json<Value> {
    server.record("POST /files".to_string());
    Json(json!({ "id": "file_1" }))
}

async fn delete_file(State(server): State<Shared>, Path(file): Path<String>) -> Json<Value> {
    server.record(format!("DELETE /files/{file}"));
    Json(json!({ "id": file, "deleted": true }))
}

async fn spawn_server(server: FakeAssistants) -> (AssistantsClient, Shared) {
    let shared = Arc::new(server);
    let app = Router::new()
        .route("/threads", post(create_thread))
        .route("/threads/:thread", get(retrieve_thread).delete(delete_thread))
        .route(
            "/threads/:thread/messages",
            post(post_message).get(list_messages),
        )
        .route("/threads/:thread/runs", post(create_run))
        .route("/threads/:thread/runs/:run", get(get_run))
        .route("/files", post(upload_file))
        .route("/files/:file", delete(delete_file))
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let settings = ProviderSettings {
        base_url: format!("http://{}", addr),
        poll_interval_ms: 5,
        run_timeout_secs: 5,
        ..ProviderSettings::default()
    };
    let client = AssistantsClient::new(
        Credential::new("sk-test"),
        CapabilityId::new("asst_process"),
        &settings,
    )
    .unwrap();
    (client, shared)
}

fn requirements_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "Orders are approved by a manager before shipping.").unwrap();
    file
}

#[tokio::test]
async fn generate_posts_extras_then_prompt_then_attachment() {
    let (client, server) = spawn_server(FakeAssistants::new("completed", Some("<process/>"))).await;
    let attachment = requirements_file();
    let mut extras = Extras::new();
    extras.insert("lang".to_string(), ExtraValue::from("en"));

    let generation = client
        .generate(GenerateRequest {
            prompt: "order to cash",
            attachment: Some(attachment.path()),
            extras: &extras,
        })
        .await
        .unwrap();

    assert_eq!(generation.text, "<process/>");
    assert_eq!(generation.conversation, ConversationHandle::new("thread_1"));
    assert_eq!(
        server.messages.lock().clone(),
        vec![
            ("lang=en\n".to_string(), false),
            ("order to cash".to_string(), false),
            (ATTACHMENT_INSTRUCTION.to_string(), true),
        ]
    );

    let requests = server.requests();
    let upload = requests.iter().position(|r| r == "POST /files").unwrap();
    let removal = requests.iter().position(|r| r == "DELETE /files/file_1").unwrap();
    assert!(upload < removal);
    assert_eq!(server.count("DELETE /threads/thread_1"), 0);
}

#[tokio::test]
async fn failed_generate_releases_thread_and_uploaded_file() {
    let (client, server) = spawn_server(FakeAssistants::new("failed", None)).await;
    let attachment = requirements_file();
    let extras = Extras::new();

    let err = client
        .generate(GenerateRequest {
            prompt: "",
            attachment: Some(attachment.path()),
            extras: &extras,
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProviderError::Incomplete {
            status: RunStatus::Failed
        }
    ));
    assert_eq!(
        server.messages.lock().clone(),
        vec![(ATTACHMENT_INSTRUCTION.to_string(), true)]
    );
    assert_eq!(server.count("DELETE /files/file_1"), 1);
    assert_eq!(server.count("DELETE /threads/thread_1"), 1);
}

#[tokio::test]
async fn completed_run_without_reply_is_an_error() {
    let (client, server) = spawn_server(FakeAssistants::new("completed", None)).await;
    let extras = Extras::new();

    let err = client
        .generate(GenerateRequest {
            prompt: "hire employee",
            attachment: None,
            extras: &extras,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::EmptyReply));
    assert_eq!(server.count("DELETE /threads/thread_1"), 1);
}

#[tokio::test]
async fn continue_conversation_deletes_thread_once() {
    let (client, server) = spawn_server(FakeAssistants::new("completed", Some("<diagram/>"))).await;

    let text = client
        .continue_conversation(&ConversationHandle::new("thread_1"))
        .await
        .unwrap();

    assert_eq!(text, "<diagram/>");
    assert_eq!(server.requests()[0], "GET /threads/thread_1");
    assert_eq!(server.count("POST /threads/thread_1/runs"), 1);
    assert_eq!(server.count("DELETE /threads/thread_1"), 1);
}

#[tokio::test]
async fn continue_conversation_releases_thread_after_failed_run() {
    let (client, server) = spawn_server(FakeAssistants::new("expired", None)).await;

    let err = client
        .continue_conversation(&ConversationHandle::new("thread_1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProviderError::Incomplete {
            status: RunStatus::Expired
        }
    ));
    assert_eq!(server.count("DELETE /threads/thread_1"), 1);
}

#[tokio::test]
async fn continue_conversation_releases_thread_when_lookup_fails() {
    let (client, server) = spawn_server(FakeAssistants {
        fail_retrieve: true,
        ..FakeAssistants::new("completed", Some("<diagram/>"))
    })
    .await;

    let err = client
        .continue_conversation(&ConversationHandle::new("t1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::RequestFailed(_)));
    assert_eq!(
        server.requests(),
        vec!["GET /threads/t1".to_string(), "DELETE /threads/t1".to_string()]
    );
}
