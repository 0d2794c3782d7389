use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router, middleware};
use serde::{Deserialize, Serialize};
use validator::Validate;

use staylink_domain::conversations::{
    ConversationCreate, ConversationService, ConversationSummary, ConversationView,
};
use staylink_domain::error::DomainError;
use staylink_domain::identity::ActorIdentity;
use staylink_domain::messages::{
    AppendMessageInput, Message, MessagePage, MessageService, MessageType, build_page_request,
};

use crate::error::ApiError;
use crate::gateway;
use crate::middleware as app_middleware;
use crate::middleware::AuthContext;
use crate::observability;
use crate::state::AppState;
use crate::validation::validate;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/v1/conversations",
            post(find_or_create_conversation).get(list_conversations),
        )
        .route(
            "/v1/conversations/:conversation_id/messages",
            get(list_messages).post(send_message),
        )
        .route(
            "/v1/conversations/:conversation_id/read",
            patch(mark_conversation_read),
        )
        .route(
            "/v1/conversations/:conversation_id/archive",
            patch(archive_conversation),
        )
        .route("/v1/messages/:message_id", delete(delete_message))
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        // The gateway authenticates on its own because browser WebSocket
        // clients cannot attach an Authorization header.
        .route("/v1/realtime", get(gateway::realtime_handler))
        .merge(protected)
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(app_middleware::metrics_layer));

    if !state.config.app_env.eq_ignore_ascii_case("test") {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

async fn metrics() -> Result<String, ApiError> {
    observability::render_metrics().ok_or(ApiError::Internal)
}

#[derive(Debug, Deserialize, Validate)]
struct CreateConversationRequest {
    #[validate(length(min = 1, max = 128))]
    recipient_id: String,
    #[validate(length(min = 1, max = 128))]
    listing_id: String,
}

async fn find_or_create_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<Json<ConversationView>, ApiError> {
    let actor = actor_identity(&auth)?;
    validate(&payload)?;
    let view = conversation_service(&state)
        .find_or_create(
            &actor,
            ConversationCreate {
                recipient_id: payload.recipient_id,
                listing_id: payload.listing_id,
            },
        )
        .await
        .map_err(map_domain_error)?;
    Ok(Json(view))
}

async fn list_conversations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let summaries = conversation_service(&state)
        .list_for_user(&actor)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessagesQuery>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<MessagePage>, ApiError> {
    let actor = actor_identity(&auth)?;
    let page = build_page_request(query.page, query.limit);
    let messages = message_service(&state)
        .list(&actor, &conversation_id, page)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize, Validate)]
struct SendMessageRequest {
    #[validate(length(min = 1, max = 2000))]
    content: String,
    #[serde(default)]
    message_type: MessageType,
    #[validate(url)]
    image_url: Option<String>,
    booking_id: Option<String>,
}

async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let actor = actor_identity(&auth)?;
    validate(&payload)?;
    let (message, _) = message_service(&state)
        .append(
            &actor,
            AppendMessageInput {
                conversation_id,
                content: payload.content,
                message_type: payload.message_type,
                image_url: payload.image_url,
                booking_id: payload.booking_id,
            },
        )
        .await
        .map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Serialize)]
struct MarkReadResponse {
    messages_marked_read: u64,
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let actor = actor_identity(&auth)?;
    let messages_marked_read = conversation_service(&state)
        .mark_read(&actor, &conversation_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(MarkReadResponse {
        messages_marked_read,
    }))
}

#[derive(Serialize)]
struct ArchiveResponse {
    conversation_id: String,
    status: &'static str,
}

async fn archive_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ArchiveResponse>, ApiError> {
    let actor = actor_identity(&auth)?;
    conversation_service(&state)
        .archive(&actor, &conversation_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(ArchiveResponse {
        conversation_id,
        status: "archived",
    }))
}

#[derive(Serialize)]
struct DeleteMessageResponse {
    message_id: String,
    deleted: bool,
}

async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<DeleteMessageResponse>, ApiError> {
    let actor = actor_identity(&auth)?;
    message_service(&state)
        .delete(&actor, &message_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(DeleteMessageResponse {
        message_id,
        deleted: true,
    }))
}

fn conversation_service(state: &AppState) -> ConversationService {
    ConversationService::new(
        state.conversation_repo.clone(),
        state.message_repo.clone(),
        state.directory.clone(),
    )
}

fn message_service(state: &AppState) -> MessageService {
    MessageService::new(
        state.conversation_repo.clone(),
        state.message_repo.clone(),
        state.directory.clone(),
    )
}

fn actor_identity(auth: &AuthContext) -> Result<ActorIdentity, ApiError> {
    let user_id = auth
        .user_id
        .as_ref()
        .filter(|user_id| !user_id.trim().is_empty())
        .ok_or(ApiError::Unauthorized)?;
    Ok(ActorIdentity {
        user_id: user_id.to_string(),
        username: auth.username.clone().unwrap_or_else(|| user_id.to_string()),
    })
}

fn map_domain_error(err: DomainError) -> ApiError {
    match err {
        DomainError::Validation(message) => ApiError::Validation(message),
        DomainError::Forbidden => ApiError::Forbidden,
        DomainError::NotFound => ApiError::NotFound,
        DomainError::Conflict => ApiError::Conflict,
    }
}
