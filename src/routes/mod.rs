//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the chat socket at `/api/ws` and the message
//! history resource under `/api/messages`. Unknown paths get a JSON 404.

pub mod messages;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api", get(messages::api_root))
        .route("/api/messages", get(messages::list_messages).post(messages::create_message))
        .route("/api/messages/project/{project_id}", get(messages::list_project_messages))
        .route("/api/messages/user/{user_id}", get(messages::list_user_messages))
        .route(
            "/api/messages/{id}",
            get(messages::get_message)
                .put(messages::update_message)
                .delete(messages::delete_message),
        )
        .route("/api/messages/{id}/read/{user_id}", patch(messages::mark_message_read))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn not_found() -> Response {
    messages::ApiError(StatusCode::NOT_FOUND, "Route not found".into()).into_response()
}
