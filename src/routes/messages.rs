//! Message history REST routes.
//!
//! All bodies are JSON. Failures carry `{"message": ...}` with the status
//! chosen by `message_error_to_response`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::services::message::{MessageError, MessageUpdate, NewMessage, StoredMessage};
use crate::state::AppState;

const NOT_FOUND_MESSAGE: &str = "Message not found";

// =============================================================================
// BODIES
// =============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self { message: message.into() })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub project_id: Option<String>,
    pub user_id: Option<String>,
}

/// Error half of every handler: a status and a `{message}` body.
#[derive(Debug)]
pub struct ApiError(pub StatusCode, pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, MessageBody::new(self.1)).into_response()
    }
}

impl From<MessageError> for ApiError {
    fn from(err: MessageError) -> Self {
        message_error_to_response(err)
    }
}

pub(crate) fn message_error_to_response(err: MessageError) -> ApiError {
    match err {
        MessageError::NotFound(_) => ApiError(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE.into()),
        MessageError::Invalid(reason) => ApiError(StatusCode::BAD_REQUEST, reason.into()),
        MessageError::Database(e) => {
            error!(error = %e, "messages: database failure");
            ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `Json` extractor whose rejections keep the `{message}` error shape.
/// Every body failure (syntax, schema, content type) answers 400.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError(StatusCode::BAD_REQUEST, rejection.body_text())),
        }
    }
}

/// Unparseable ids cannot name a stored message.
fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE.into()))
}

fn found(id: Uuid, message: Option<StoredMessage>) -> Result<Json<StoredMessage>, ApiError> {
    message
        .map(Json)
        .ok_or_else(|| message_error_to_response(MessageError::NotFound(id)))
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /api`: liveness banner.
pub async fn api_root() -> Json<MessageBody> {
    MessageBody::new("EventEase API is running")
}

/// `GET /api/messages`: by `projectId` when given, otherwise by `userId`.
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let messages = match query.project_id.as_deref() {
        Some(project_id) if !project_id.is_empty() => state.store.list_by_project(project_id).await?,
        _ => state.store.list_by_user(query.user_id.as_deref()).await?,
    };
    Ok(Json(messages))
}

/// `GET /api/messages/project/{project_id}`: oldest first.
pub async fn list_project_messages(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    Ok(Json(state.store.list_by_project(&project_id).await?))
}

/// `GET /api/messages/user/{user_id}`
pub async fn list_user_messages(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    Ok(Json(state.store.list_by_user(Some(&user_id)).await?))
}

/// `GET /api/messages/{id}`
pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredMessage>, ApiError> {
    let id = parse_id(&id)?;
    found(id, state.store.get(id).await?)
}

/// `POST /api/messages`
pub async fn create_message(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<NewMessage>,
) -> Result<(StatusCode, Json<StoredMessage>), ApiError> {
    let stored = state.store.create(body).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// `PUT /api/messages/{id}`: edit text.
pub async fn update_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<MessageUpdate>,
) -> Result<Json<StoredMessage>, ApiError> {
    let id = parse_id(&id)?;
    found(id, state.store.update(id, body).await?)
}

/// `PATCH /api/messages/{id}/read/{user_id}`
pub async fn mark_message_read(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<StoredMessage>, ApiError> {
    let id = parse_id(&id)?;
    found(id, state.store.mark_read(id, &user_id).await?)
}

/// `DELETE /api/messages/{id}`
pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    let id = parse_id(&id)?;
    if !state.store.delete(id).await? {
        return Err(message_error_to_response(MessageError::NotFound(id)));
    }
    Ok(MessageBody::new("Message deleted successfully"))
}

#[cfg(test)]
#[path = "messages_test.rs"]
mod tests;
