use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{chat, collections, config, conversations, health};
use crate::state::AppState;

/// Creates the application router with CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server.cors_allowed_origins);
    Router::new()
        .route("/health", get(health::health))
        .route("/api/health", get(health::api_health))
        .route("/api/config", get(config::get_config))
        .route(
            "/api/chat",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/api/chat/:conversation_id",
            get(conversations::get_conversation).delete(conversations::delete_conversation),
        )
        .route(
            "/api/chat/:conversation_id/messages",
            post(chat::post_messages),
        )
        .route("/api/agent/request", post(chat::agent_request))
        .route(
            "/api/collections/:collection_id",
            get(collections::get_collection).delete(collections::delete_collection),
        )
        .route(
            "/api/collections/:collection_id/chunks",
            post(collections::index_chunks),
        )
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(configured: &[String]) -> CorsLayer {
    let origins = if configured.is_empty() {
        default_local_origins()
    } else {
        configured.to_vec()
    };
    let allowed_origins = origins
        .into_iter()
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}
