use std::sync::Arc;

use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::core::config::{AppPaths, ConfigService, RagSettings};
use crate::history::{ConversationStore, HistoryStore};
use crate::rag::SqliteRagStore;
use crate::server::router;
use crate::state::AppState;
use crate::test_support::{HashEmbedder, ScriptedLlm, StreamScript, StreamStep};

struct TestServer {
    _dir: tempfile::TempDir,
    state: Arc<AppState>,
    base_url: String,
    client: reqwest::Client,
}

async fn spawn_server(llm: ScriptedLlm, settings: RagSettings) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let paths = Arc::new(AppPaths::with_data_dir(
        dir.path().to_path_buf(),
        dir.path().to_path_buf(),
    ));
    let history = Arc::new(HistoryStore::new(paths.db_path.clone()).await.unwrap());
    let rag_store = Arc::new(
        SqliteRagStore::new(paths.rag_db_path.clone(), Arc::new(HashEmbedder::default()))
            .await
            .unwrap(),
    );
    let state = AppState::from_parts(
        paths.clone(),
        ConfigService::new(paths),
        settings,
        history,
        rag_store,
        Arc::new(llm),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestServer {
        _dir: dir,
        state,
        base_url: format!("http://{}", addr),
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    async fn create_chat(&self, collections: &[&str]) -> String {
        let res = self
            .post("/api/chat", json!({ "title": "Support", "collection_ids": collections }))
            .await;
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        body["conversation"]["id"].as_str().unwrap().to_string()
    }

    async fn index(&self, collection: &str, contents: &[&str]) {
        let chunks: Vec<Value> = contents.iter().map(|c| json!({ "content": c })).collect();
        let res = self
            .post(
                &format!("/api/collections/{}/chunks", collection),
                json!({ "chunks": chunks }),
            )
            .await;
        assert_eq!(res.status(), 200);
    }
}

#[tokio::test]
async fn health_endpoints_respond() {
    let server = spawn_server(ScriptedLlm::new(), RagSettings::default()).await;

    let body: Value = server
        .client
        .get(server.url("/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let res = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn streaming_chat_emits_protocol_lines_and_persists_answer() {
    let server = spawn_server(
        ScriptedLlm::new().stream_text(&["Refunds take \"30 days\"", "\nSee passage 1."]),
        RagSettings::default(),
    )
    .await;
    server.index("kb", &["refund policy applies within 30 days"]).await;
    let chat_id = server.create_chat(&["kb"]).await;

    let res = server
        .post(
            &format!("/api/chat/{}/messages", chat_id),
            json!({ "messages": [{ "role": "user", "content": "how many days to refund?" }] }),
        )
        .await;
    assert_eq!(res.status(), 200);
    let body = res.text().await.unwrap();
    assert_eq!(
        body,
        "0:\"Refunds take \\\"30 days\\\"\"\n0:\"\\nSee passage 1.\"\n"
    );

    let detail: Value = server
        .client
        .get(server.url(&format!("/api/chat/{}", chat_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let turns = detail["conversation"]["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1]["role"], "assistant");
    assert_eq!(turns[1]["content"], "Refunds take \"30 days\"\nSee passage 1.");
}

#[tokio::test]
async fn stream_failure_ends_with_error_line() {
    let server = spawn_server(
        ScriptedLlm::new().stream_with(StreamScript::Steps(vec![
            StreamStep::Text("a".to_string()),
            StreamStep::Text("b".to_string()),
            StreamStep::Fail("upstream closed".to_string()),
        ])),
        RagSettings::default(),
    )
    .await;
    server.index("kb", &["letters a and b"]).await;
    let chat_id = server.create_chat(&["kb"]).await;

    let body = server
        .post(
            &format!("/api/chat/{}/messages", chat_id),
            json!({ "messages": [{ "role": "user", "content": "letters?" }] }),
        )
        .await
        .text()
        .await
        .unwrap();

    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "0:\"a\"");
    assert_eq!(lines[1], "0:\"b\"");
    assert!(lines[2].starts_with("3:{text:\"Error generating response:"));
    assert!(lines[2].contains("upstream closed"));
}

#[tokio::test]
async fn non_streaming_chat_returns_reply_json() {
    let server = spawn_server(ScriptedLlm::new(), RagSettings::default()).await;
    let chat_id = server.create_chat(&["nothing-indexed"]).await;

    let res = server
        .post(
            &format!("/api/chat/{}/messages", chat_id),
            json!({
                "messages": [{ "role": "user", "content": "hello?" }],
                "stream": false
            }),
        )
        .await;
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body["reply"],
        "I don't have any knowledge base to help answer your question."
    );
}

#[tokio::test]
async fn last_message_must_come_from_user() {
    let server = spawn_server(ScriptedLlm::new(), RagSettings::default()).await;
    let chat_id = server.create_chat(&[]).await;

    let res = server
        .post(
            &format!("/api/chat/{}/messages", chat_id),
            json!({ "messages": [
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": "hello" }
            ] }),
        )
        .await;
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Last message must be from user");

    let res = server
        .post(&format!("/api/chat/{}/messages", chat_id), json!({ "messages": [] }))
        .await;
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn unknown_chat_is_not_found() {
    let server = spawn_server(ScriptedLlm::new(), RagSettings::default()).await;

    let res = server
        .post(
            "/api/chat/does-not-exist/messages",
            json!({ "messages": [{ "role": "user", "content": "hi" }] }),
        )
        .await;
    assert_eq!(res.status(), 404);

    let res = server
        .client
        .delete(server.url("/api/chat/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn agent_request_uses_configured_default_conversation() {
    let mut settings = RagSettings::default();
    settings.server.default_conversation_id = Some("agent-chat".to_string());
    settings.server.default_collection_ids = vec!["kb".to_string()];
    let server = spawn_server(ScriptedLlm::new().stream_text(&["Thirty days."]), settings).await;
    server.index("kb", &["refund policy applies within 30 days"]).await;

    let res = server
        .post(
            "/api/agent/request",
            json!({
                "message": "refund window?",
                "history": [{ "role": "user", "content": "hi" }, { "role": "assistant", "content": "hello" }]
            }),
        )
        .await;
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["reply"], "Thirty days.");

    let turns = server.state.history.list_turns("agent-chat").await.unwrap();
    assert_eq!(turns.len(), 2);
    let collections = server
        .state
        .history
        .conversation_collections("agent-chat")
        .await
        .unwrap();
    assert_eq!(collections, vec!["kb"]);

    let res = server
        .post(
            "/api/agent/request",
            json!({ "message": "refund window?", "conversation_id": "unknown" }),
        )
        .await;
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn agent_request_without_any_conversation_is_rejected() {
    let server = spawn_server(ScriptedLlm::new(), RagSettings::default()).await;
    let res = server
        .post("/api/agent/request", json!({ "message": "hi" }))
        .await;
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn busy_conversation_cannot_be_deleted() {
    let server = spawn_server(ScriptedLlm::new(), RagSettings::default()).await;
    let chat_id = server.create_chat(&[]).await;

    let guard = server.state.pipeline.locks().try_acquire(&chat_id).unwrap();
    let res = server
        .client
        .delete(server.url(&format!("/api/chat/{}", chat_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);

    let res = server
        .post(
            &format!("/api/chat/{}/messages", chat_id),
            json!({ "messages": [{ "role": "user", "content": "hi" }] }),
        )
        .await;
    assert_eq!(res.status(), 409);
    // The rejected delete left the running request's claim in place.
    assert!(server.state.pipeline.locks().try_acquire(&chat_id).is_none());

    drop(guard);
    let res = server
        .client
        .delete(server.url(&format!("/api/chat/{}", chat_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    // The delete's own claim is released once it returns.
    assert!(!server.state.pipeline.locks().is_busy(&chat_id));
    let res = server
        .post(
            &format!("/api/chat/{}/messages", chat_id),
            json!({ "messages": [{ "role": "user", "content": "hi" }] }),
        )
        .await;
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn conversation_crud_round_trip() {
    let server = spawn_server(ScriptedLlm::new(), RagSettings::default()).await;

    let res = server.post("/api/chat", json!({ "title": "  " })).await;
    assert_eq!(res.status(), 400);

    let chat_id = server.create_chat(&["kb1", "kb2"]).await;
    let list: Value = server
        .client
        .get(server.url("/api/chat"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let conversations = list["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["collection_ids"], json!(["kb1", "kb2"]));

    let res = server
        .client
        .delete(server.url(&format!("/api/chat/{}", chat_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let res = server
        .client
        .get(server.url(&format!("/api/chat/{}", chat_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn collection_endpoints_count_and_delete() {
    let server = spawn_server(ScriptedLlm::new(), RagSettings::default()).await;
    server.index("kb", &["one", "two"]).await;

    let body: Value = server
        .client
        .get(server.url("/api/collections/kb"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["chunk_count"], 2);

    let res = server
        .post("/api/collections/kb/chunks", json!({ "chunks": [{ "content": " " }] }))
        .await;
    assert_eq!(res.status(), 400);

    let body: Value = server
        .client
        .delete(server.url("/api/collections/kb"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["deleted"], 2);
}
