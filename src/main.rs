use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use rag_chat_backend::server;
use rag_chat_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state = AppState::initialize().await?;
    rag_chat_backend::core::logging::init(&state.paths);

    let bind_addr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    );
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    println!("RAG_CHAT_PORT={}", addr.port());
    tracing::info!(
        "Listening on {} (llm: {}, model: {})",
        addr,
        state.llm.name(),
        state.settings.llm.model
    );

    let app: Router = server::router(state.clone());
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
