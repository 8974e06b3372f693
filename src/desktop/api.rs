use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        FromRequestParts, Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use tokio::sync::broadcast;
use tracing::error;

use super::ai::AiService;
use super::auth::AuthUser;
use super::db::DbHandle;
#[cfg(test)]
use super::db::DesktopDb;
use super::filesystem;
use super::metrics::SystemSampler;
use super::models::*;
use super::window::{self, AppCategory, Desktop};
use super::ws::{ServerMessage, UserEvent, publish};
use crate::config::AuthSection;
use crate::errors::DesktopError;

const TERMINAL_HISTORY_LIMIT: i64 = 50;
const DEFAULT_METRICS_LIMIT: i64 = 100;
const MAX_METRICS_LIMIT: i64 = 1000;
const CHAT_CONTEXT_MESSAGES: usize = 10;
const DEFAULT_CHAT_TITLE: &str = "New Chat";
const DEFAULT_CODE_LANGUAGE: &str = "javascript";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ai: AiService,
    pub sampler: SystemSampler,
    pub events: broadcast::Sender<UserEvent>,
    pub auth: AuthSection,
}

impl AppState {
    pub fn new(db: DbHandle, ai: AiService, auth: AuthSection) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            db,
            ai,
            sampler: SystemSampler::new(),
            events,
            auth,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentQuery {
    pub parent_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest {
    pub name: Option<String>,
    pub path: Option<String>,
    pub parent_path: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<FileKind>,
    pub content: Option<String>,
    pub size: Option<i64>,
    pub parent_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileRequest {
    pub name: Option<String>,
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<FileKind>,
    pub content: Option<String>,
    pub size: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<i64>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveFileRequest {
    pub parent_path: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateChatSessionRequest {
    pub title: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateChatMessageRequest {
    pub role: Option<ChatRole>,
    pub content: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatExchange {
    pub user_message: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_message: Option<ChatMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTerminalSessionRequest {
    pub current_directory: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateTerminalCommandRequest {
    pub command: Option<String>,
    pub output: Option<String>,
    #[serde(default)]
    pub executed: bool,
}

#[derive(Serialize)]
pub struct TerminalExchange {
    pub command: TerminalCommand,
    pub interpretation: super::ai::CommandInterpretation,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeFileRequest {
    pub file_name: Option<String>,
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct CodeSuggestionsRequest {
    pub code: Option<String>,
    pub language: Option<String>,
}

#[derive(Deserialize)]
pub struct OptimizeSystemRequest {
    pub metrics: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Serialize)]
pub struct Optimizations {
    pub optimizations: Vec<String>,
}

#[derive(Deserialize)]
pub struct MetricsQuery {
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMetricRequest {
    pub metric_type: Option<String>,
    pub value: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePermissionRequest {
    pub user_id: Option<String>,
    pub permission: Option<String>,
    #[serde(default)]
    pub granted: bool,
}

#[derive(Deserialize)]
pub struct UpdatePermissionRequest {
    pub granted: Option<bool>,
}

#[derive(Deserialize)]
pub struct AppsQuery {
    pub q: Option<String>,
    pub category: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(e) => {
                error!(error = ?e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<DesktopError>() {
            Some(de) if de.is_not_found() => ApiError::NotFound(de.to_string()),
            Some(DesktopError::BadRequest(msg)) => ApiError::BadRequest(msg.clone()),
            Some(de @ DesktopError::InvalidValue { .. }) => ApiError::BadRequest(de.to_string()),
            _ => ApiError::Internal(e),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// `Path` whose rejection is reported as a JSON `ApiError`.
pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// `Query` whose rejection is reported as a JSON `ApiError`.
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

fn required<T>(value: Option<T>, message: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::BadRequest(message.to_string()))
}

fn required_text(value: Option<String>, message: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(message.to_string()))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/user", get(get_auth_user))
        .route("/api/files", get(list_files).post(create_file))
        .route("/api/files/tree", get(file_tree))
        .route("/api/files/stats", get(file_stats))
        .route("/api/files/search", get(search_files))
        .route(
            "/api/files/{id}",
            get(get_file).put(update_file).delete(delete_file),
        )
        .route("/api/files/{id}/move", post(move_file))
        .route(
            "/api/chat/sessions",
            get(list_chat_sessions).post(create_chat_session),
        )
        .route(
            "/api/chat/sessions/{id}/messages",
            get(list_chat_messages).post(create_chat_message),
        )
        .route("/api/terminal/session", get(get_terminal_session))
        .route("/api/terminal/sessions/{id}", patch(update_terminal_session))
        .route(
            "/api/terminal/sessions/{id}/commands",
            get(list_terminal_commands).post(create_terminal_command),
        )
        .route("/api/ai/analyze-file", post(analyze_file))
        .route("/api/ai/code-suggestions", post(code_suggestions))
        .route("/api/ai/optimize-system", post(optimize_system))
        .route("/api/metrics", get(list_metrics).post(create_metric))
        .route(
            "/api/permissions",
            get(list_permissions).post(create_permission),
        )
        .route("/api/permissions/{id}", put(update_permission))
        .route("/api/apps", get(list_apps))
        .route("/api/desktop/layout", get(desktop_layout))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_auth_user(
    user: AuthUser,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let upsert = user.to_upsert();
    let user = state
        .db
        .call(move |db| {
            let user = db.upsert_user(&upsert)?;
            filesystem::initialize_user_filesystem(db, &user.id)?;
            Ok(user)
        })
        .await?;
    Ok(Json(user))
}

// Files

async fn list_files(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<ParentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let files = state
        .db
        .call(move |db| db.list_files(&user.id, query.parent_id))
        .await?;
    Ok(Json(files))
}

async fn file_tree(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<ParentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tree = state
        .db
        .call(move |db| filesystem::directory_tree(db, &user.id, query.parent_id))
        .await?;
    Ok(Json(tree))
}

async fn file_stats(
    user: AuthUser,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .db
        .call(move |db| filesystem::stats(db, &user.id))
        .await?;
    Ok(Json(stats))
}

async fn search_files(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let q = required_text(query.q, "Search query required")?;
    let needle = q.clone();
    let files = state
        .db
        .call(move |db| filesystem::search(db, &user.id, &needle))
        .await?;
    let ranked = state.ai.rank_files(&q, files).await;
    Ok(Json(ranked))
}

async fn get_file(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let file = state
        .db
        .call(move |db| db.get_file(id, &user.id))
        .await?;
    match file {
        Some(file) => Ok(Json(file)),
        None => Err(ApiError::NotFound(format!("File {} not found", id))),
    }
}

async fn create_file(
    user: AuthUser,
    State(state): State<SharedState>,
    payload: Result<Json<CreateFileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let name = required_text(req.name, "name and type are required")?;
    let kind = required(req.kind, "name and type are required")?;
    let user_id = user.id.clone();

    let file = match (req.path, req.parent_path) {
        (Some(path), _) => {
            let new_file = match kind {
                FileKind::Directory => NewFile::directory(&name, &path, req.parent_id),
                FileKind::File => {
                    let mut f = NewFile::file(
                        &name,
                        &path,
                        req.content.as_deref().unwrap_or_default(),
                        req.parent_id,
                    );
                    if let Some(size) = req.size {
                        f.size = size;
                    }
                    f
                }
            };
            state
                .db
                .call(move |db| db.create_file(&user_id, &new_file))
                .await?
        }
        (None, Some(parent_path)) => {
            let content = req.content;
            state
                .db
                .call(move |db| {
                    filesystem::create_file(
                        db,
                        &user_id,
                        &name,
                        &parent_path,
                        kind,
                        content.as_deref(),
                    )
                })
                .await?
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "path or parentPath is required".into(),
            ));
        }
    };

    publish(
        &state.events,
        &user.id,
        &ServerMessage::FileCreated { file: file.clone() },
    );
    Ok((StatusCode::CREATED, Json(file)))
}

async fn update_file(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    payload: Result<Json<UpdateFileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let patch = FilePatch {
        name: req.name,
        path: req.path,
        kind: req.kind,
        content: req.content,
        size: req.size,
        parent_id: req.parent_id,
    };
    if patch.is_empty() {
        return Err(ApiError::BadRequest("No fields to update".into()));
    }

    let user_id = user.id.clone();
    let file = state
        .db
        .call(move |db| filesystem::update_file(db, &user_id, id, patch))
        .await?;
    publish(
        &state.events,
        &user.id,
        &ServerMessage::FileUpdated { file: file.clone() },
    );
    Ok(Json(file))
}

async fn delete_file(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id.clone();
    state
        .db
        .call(move |db| filesystem::delete_recursive(db, &user_id, id))
        .await?;
    publish(&state.events, &user.id, &ServerMessage::FileDeleted { id });
    Ok(StatusCode::NO_CONTENT)
}

async fn move_file(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    payload: Result<Json<MoveFileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let parent_path = required_text(req.parent_path, "parentPath is required")?;
    let user_id = user.id.clone();
    let file = state
        .db
        .call(move |db| filesystem::move_file(db, &user_id, id, &parent_path))
        .await?;
    publish(
        &state.events,
        &user.id,
        &ServerMessage::FileUpdated { file: file.clone() },
    );
    Ok(Json(file))
}

// Chat

async fn list_chat_sessions(
    user: AuthUser,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state
        .db
        .call(move |db| db.list_chat_sessions(&user.id))
        .await?;
    Ok(Json(sessions))
}

async fn create_chat_session(
    user: AuthUser,
    State(state): State<SharedState>,
    payload: Result<Json<CreateChatSessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string());
    let session = state
        .db
        .call(move |db| db.create_chat_session(&user.id, &title))
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_chat_messages(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .db
        .call(move |db| db.list_chat_messages(id, &user.id))
        .await?;
    Ok(Json(messages))
}

/// Store the message and, for user messages, the assistant's reply. Earlier
/// messages of the session are passed to the model as context.
async fn create_chat_message(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    payload: Result<Json<CreateChatMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let content = required_text(req.content, "role and content are required")?;
    let role = required(req.role, "role and content are required")?;

    let user_id = user.id.clone();
    let text = content.clone();
    let (user_message, context) = state
        .db
        .call(move |db| {
            let history = db.list_chat_messages(id, &user_id)?;
            let message = db.create_chat_message(id, role, &text)?;
            let skip = history.len().saturating_sub(CHAT_CONTEXT_MESSAGES);
            let context: Vec<String> = history
                .iter()
                .skip(skip)
                .map(|m| format!("{}: {}", m.role.as_str(), m.content))
                .collect();
            Ok((message, context))
        })
        .await?;
    publish(
        &state.events,
        &user.id,
        &ServerMessage::ChatMessageCreated {
            message: user_message.clone(),
        },
    );

    let ai_message = if role == ChatRole::User {
        let reply = state.ai.chat_response(&content, &context).await;
        let message = state
            .db
            .call(move |db| db.create_chat_message(id, ChatRole::Assistant, &reply.content))
            .await?;
        publish(
            &state.events,
            &user.id,
            &ServerMessage::ChatMessageCreated {
                message: message.clone(),
            },
        );
        Some(message)
    } else {
        None
    };

    Ok((
        StatusCode::CREATED,
        Json(ChatExchange {
            user_message,
            ai_message,
        }),
    ))
}

// Terminal

async fn get_terminal_session(
    user: AuthUser,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .db
        .call(move |db| match db.latest_terminal_session(&user.id)? {
            Some(session) => Ok(session),
            None => db.create_terminal_session(&user.id, DEFAULT_TERMINAL_DIRECTORY),
        })
        .await?;
    Ok(Json(session))
}

async fn update_terminal_session(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    payload: Result<Json<UpdateTerminalSessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let dir = required_text(req.current_directory, "currentDirectory is required")?;
    let session = state
        .db
        .call(move |db| db.update_terminal_session(id, &user.id, &dir))
        .await?;
    Ok(Json(session))
}

async fn list_terminal_commands(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let commands = state
        .db
        .call(move |db| {
            if db.get_terminal_session(id, &user.id)?.is_none() {
                return Err(DesktopError::TerminalSessionNotFound { id }.into());
            }
            db.list_terminal_commands(id, TERMINAL_HISTORY_LIMIT)
        })
        .await?;
    Ok(Json(commands))
}

async fn create_terminal_command(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    payload: Result<Json<CreateTerminalCommandRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let command = required_text(req.command, "command is required")?;

    let user_id = user.id.clone();
    let session = state
        .db
        .call(move |db| db.get_terminal_session(id, &user_id))
        .await?
        .ok_or(DesktopError::TerminalSessionNotFound { id })
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    let interpretation = state
        .ai
        .interpret_command(&command, &session.current_directory)
        .await;
    let new_command = NewTerminalCommand {
        command,
        output: req.output,
        ai_interpretation: Some(interpretation.interpretation.clone()),
        executed: req.executed,
    };
    let command = state
        .db
        .call(move |db| db.create_terminal_command(id, &new_command))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(TerminalExchange {
            command,
            interpretation,
        }),
    ))
}

// AI

async fn analyze_file(
    _user: AuthUser,
    State(state): State<SharedState>,
    payload: Result<Json<AnalyzeFileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    const MSG: &str = "fileName and content are required";
    let file_name = required_text(req.file_name, MSG)?;
    let content = required_text(req.content, MSG)?;
    Ok(Json(state.ai.analyze_file(&file_name, &content).await))
}

async fn code_suggestions(
    _user: AuthUser,
    State(state): State<SharedState>,
    payload: Result<Json<CodeSuggestionsRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let code = required_text(req.code, "Code is required")?;
    let language = req
        .language
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| DEFAULT_CODE_LANGUAGE.to_string());
    Ok(Json(state.ai.code_suggestions(&code, &language).await))
}

async fn optimize_system(
    _user: AuthUser,
    State(state): State<SharedState>,
    payload: Result<Json<OptimizeSystemRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let metrics = required(req.metrics, "Metrics are required")?;
    let optimizations = state.ai.optimize_system(&metrics).await;
    Ok(Json(Optimizations { optimizations }))
}

// Metrics

fn parse_metric_type(value: &str) -> Result<MetricType, ApiError> {
    value.parse().map_err(ApiError::BadRequest)
}

async fn list_metrics(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<MetricsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let metric_type = query
        .metric_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(parse_metric_type)
        .transpose()?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_METRICS_LIMIT)
        .clamp(1, MAX_METRICS_LIMIT);
    let metrics = state
        .db
        .call(move |db| db.list_metrics(&user.id, metric_type, limit))
        .await?;
    Ok(Json(metrics))
}

async fn create_metric(
    user: AuthUser,
    State(state): State<SharedState>,
    payload: Result<Json<CreateMetricRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    const MSG: &str = "metricType and value are required";
    let metric_type = parse_metric_type(&required_text(req.metric_type, MSG)?)?;
    let value = required(req.value, MSG)?;
    let user_id = user.id.clone();
    let metric = state
        .db
        .call(move |db| db.create_metric(&user_id, metric_type, value))
        .await?;
    publish(
        &state.events,
        &user.id,
        &ServerMessage::MetricRecorded {
            metric: metric.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(metric)))
}

// Permissions

async fn list_permissions(
    user: AuthUser,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let permissions = state
        .db
        .call(move |db| db.list_permissions(&user.id))
        .await?;
    Ok(Json(permissions))
}

async fn create_permission(
    user: AuthUser,
    State(state): State<SharedState>,
    payload: Result<Json<CreatePermissionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    const MSG: &str = "userId and permission are required";
    let target = required_text(req.user_id, MSG)?;
    let permission = required_text(req.permission, MSG)?;
    let granted = req.granted;
    let created = state
        .db
        .call(move |db| db.create_permission(&target, &permission, granted, &user.id))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_permission(
    user: AuthUser,
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    payload: Result<Json<UpdatePermissionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let granted = required(req.granted, "granted is required")?;
    let permission = state
        .db
        .call(move |db| db.update_permission(id, granted, &user.id))
        .await?;
    Ok(Json(permission))
}

// Desktop

async fn list_apps(
    _user: AuthUser,
    ApiQuery(query): ApiQuery<AppsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let category = query
        .category
        .as_deref()
        .filter(|c| !c.is_empty() && *c != "All")
        .map(|c| c.parse::<AppCategory>().map_err(ApiError::BadRequest))
        .transpose()?;
    Ok(Json(window::search_apps(query.q.as_deref(), category)))
}

async fn desktop_layout(_user: AuthUser) -> impl IntoResponse {
    Json(Desktop::with_default_layout().windows().to_vec())
}

// ── Tests ─────────────────────────────────────────────────────────────
