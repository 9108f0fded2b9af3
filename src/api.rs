use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    chat::DEFAULT_PAGE_SIZE,
    config::StorageBackend,
    error::ServiceError,
    metrics::MetricsSnapshot,
    models::{ChatTurn, Document, Message, Page, Sender, Session, SessionSummary},
};

/// Cabecera con la identidad del llamante.
pub const USER_ID_HEADER: &str = "x-user-id";

// --- Errores de la API ---

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::SessionNotFound(_) | ServiceError::DocumentNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            ServiceError::Validation(_) => ApiError::BadRequest(err.to_string()),
            ServiceError::Conflict(_) => ApiError::Conflict(err.to_string()),
            ServiceError::QueueUnavailable(_) => ApiError::ServiceUnavailable(err.to_string()),
            ServiceError::Storage(_) | ServiceError::Persistence(_) => {
                error!("Error interno atendiendo la petición: {}", err);
                ApiError::Internal("error interno del servidor".to_string())
            }
        }
    }
}

// --- Identidad del llamante ---

/// Usuario que hace la petición, leído de `X-User-Id`.
#[derive(Debug, Clone, Copy)]
pub struct CallerId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("falta la cabecera X-User-Id".into()))?;
        raw.to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(CallerId)
            .ok_or_else(|| ApiError::Unauthorized("X-User-Id no es un UUID válido".into()))
    }
}

// --- Payloads ---

#[derive(Deserialize)]
pub struct SessionNamePayload {
    name: String,
}

#[derive(Deserialize)]
pub struct CreateMessagePayload {
    content: String,
    #[serde(default)]
    sender: Option<Sender>,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    page: u32,
    size: Option<u32>,
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub metrics: MetricsSnapshot,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    let body_limit = app_state.config.max_upload_bytes;
    let mut router = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/sessions", post(create_session_handler).get(list_sessions_handler))
        .route(
            "/api/sessions/:session_id",
            get(get_session_handler)
                .patch(rename_session_handler)
                .delete(delete_session_handler),
        )
        .route("/api/sessions/:session_id/favorite", post(toggle_favorite_handler))
        .route(
            "/api/sessions/:session_id/messages",
            post(create_message_handler).get(list_messages_handler),
        )
        .route(
            "/api/sessions/:session_id/documents",
            post(upload_document_handler).get(list_documents_handler),
        )
        .route(
            "/api/sessions/:session_id/documents/:document_id",
            delete(delete_document_handler),
        )
        .route(
            "/api/sessions/:session_id/documents/:document_id/reindex",
            post(reindex_document_handler),
        );

    if app_state.config.enable_shutdown_endpoint {
        router = router.route("/api/shutdown", post(shutdown_handler));
    }

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend = match state.config.backend {
        StorageBackend::Neo4j { .. } => "neo4j",
        StorageBackend::Memory => "memory",
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        backend: backend.to_string(),
        metrics: state.metrics.snapshot(),
    })
}

#[axum::debug_handler]
async fn create_session_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(payload): Json<SessionNamePayload>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let session = state.sessions.create(user_id, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[axum::debug_handler]
async fn list_sessions_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    Ok(Json(state.sessions.list(user_id).await?))
}

#[axum::debug_handler]
async fn get_session_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSummary>, ApiError> {
    Ok(Json(state.sessions.get(user_id, session_id).await?))
}

#[axum::debug_handler]
async fn rename_session_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SessionNamePayload>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(
        state.sessions.rename(user_id, session_id, &payload.name).await?,
    ))
}

#[axum::debug_handler]
async fn delete_session_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.sessions.delete(user_id, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn toggle_favorite_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.sessions.toggle_favorite(user_id, session_id).await?))
}

#[axum::debug_handler]
async fn create_message_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<CreateMessagePayload>,
) -> Result<(StatusCode, Json<ChatTurn>), ApiError> {
    let turn = state
        .messages
        .create_message(
            user_id,
            session_id,
            payload.sender.unwrap_or(Sender::User),
            &payload.content,
            payload.metadata,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(turn)))
}

#[axum::debug_handler]
async fn list_messages_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(session_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Message>>, ApiError> {
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(Json(
        state
            .messages
            .list_messages_page(user_id, session_id, query.page, size)
            .await?,
    ))
}

#[axum::debug_handler]
async fn upload_document_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(session_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("multipart inválido: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("no se pudo leer el fichero: {e}")))?;

        let document = state
            .documents
            .upload(
                user_id,
                session_id,
                filename.as_deref(),
                content_type.as_deref(),
                &bytes,
            )
            .await?;
        return Ok((StatusCode::ACCEPTED, Json(document)));
    }

    Err(ApiError::BadRequest("falta el campo multipart 'file'".into()))
}

#[axum::debug_handler]
async fn list_documents_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<Document>>, ApiError> {
    Ok(Json(state.documents.list(user_id, session_id).await?))
}

#[axum::debug_handler]
async fn delete_document_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path((session_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .documents
        .delete(user_id, session_id, document_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn reindex_document_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path((session_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    let document = state
        .documents
        .resubmit(user_id, session_id, document_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(document)))
}

#[axum::debug_handler]
async fn shutdown_handler(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> impl IntoResponse {
    info!(%user_id, "Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .ok()
        .and_then(|mut guard| guard.take());
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    (StatusCode::OK, Json(json!({ "message": "Apagando el servidor." })))
}
