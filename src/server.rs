use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::{get, post}, Json, Router};
use base64::Engine as _;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::agent::artist::ImageGenerator;
use crate::agent::engine::{ChatLoop, LoopConfig};
use crate::agent::places::PlaceExtractor;
use crate::agent::tools::ToolRegistry;
use crate::chat::Message;
use crate::error::ChatError;
use crate::models::{ChatModel, ImageModel, ProviderRouter};
use crate::session::Session;
use crate::settings::{
    resolve_effective_settings, AppConfig, ModelCatalog, Provider, RequestOverrides, SessionSettings, SessionSettingsPatch,
};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Immutable after startup; shared by every session.
pub struct Services {
    pub config: AppConfig,
    pub tools: Arc<ToolRegistry>,
    pub providers: ProviderRouter,
    pub catalog: ModelCatalog,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub sessions: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services: Arc::new(services), sessions: Arc::default() }
    }

    async fn session(&self, id: Uuid) -> Result<Arc<Mutex<Session>>, ApiError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "session not found"))
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::ModelUnavailable(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "The assistant is unavailable right now, please try again.")
            }
            ChatError::MissingCredentials(_) => ApiError::new(StatusCode::BAD_REQUEST, e.to_string()),
            other => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

async fn index() -> Html<&'static str> { Html(INDEX_HTML) }

async fn healthz() -> &'static str { "ok" }

async fn render_metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.services.metrics.as_ref().map(|h| h.render()).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    models: Vec<String>,
    default_model: String,
    default_system_message: String,
    images_enabled: bool,
}

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let cfg = &state.services.config;
    let available = state.services.catalog.available(&cfg.providers);
    let default_model = match available.first() {
        Some(first) if !cfg.has_provider_key(cfg.chat_model.provider) => first.to_string(),
        _ => cfg.chat_model.to_string(),
    };
    Json(ModelsResponse {
        models: available.all_models(),
        default_model,
        default_system_message: cfg.system_message.clone(),
        images_enabled: cfg.images_enabled,
    })
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionBody {
    pub client_id: Option<String>,
    pub settings: Option<SessionSettings>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub id: Uuid,
}

async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionBody>>,
) -> Json<CreateSessionResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let session = Session::new(body.client_id, body.settings.unwrap_or_default());
    let id = session.id;
    state.sessions.write().await.insert(id, Arc::new(Mutex::new(session)));
    tracing::info!(session_id = %id, "session created");
    Json(CreateSessionResponse { id })
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Uuid>,
}

async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state.sessions.read().await;
    Json(ListSessionsResponse { sessions: sessions.keys().copied().collect() })
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> StatusCode {
    match state.sessions.write().await.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

#[derive(Debug, Serialize)]
struct SessionSettingsResponse {
    settings: SessionSettings,
}

async fn get_session_settings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSettingsResponse>, ApiError> {
    let session = state.session(id).await?;
    let s = session.lock().await;
    Ok(Json(SessionSettingsResponse { settings: s.settings.clone() }))
}

async fn patch_session_settings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<SessionSettingsPatch>,
) -> Result<Json<SessionSettingsResponse>, ApiError> {
    let session = state.session(id).await?;
    let mut s = session.lock().await;
    s.settings.apply_patch(patch);
    Ok(Json(SessionSettingsResponse { settings: s.settings.clone() }))
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    history: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

async fn get_history(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<HistoryResponse>, ApiError> {
    let session = state.session(id).await?;
    let s = session.lock().await;
    Ok(Json(HistoryResponse { history: s.history.clone(), image: None }))
}

#[derive(Debug, Deserialize)]
struct PostMessageBody {
    text: String,
    #[serde(flatten)]
    overrides: RequestOverrides,
}

/// Runs one chat turn. The session lock is held for the whole turn so turns
/// within a session never overlap.
async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PostMessageBody>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let text = body.text.trim();
    if text.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "message text is empty"));
    }
    let session = state.session(id).await?;
    let mut s = session.lock().await;
    let services = &state.services;

    let eff = resolve_effective_settings(&services.config, &s.settings, &body.overrides)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    let client = services.providers.client(eff.model.provider)?;
    let model: Arc<dyn ChatModel> = client;
    let mut loop_config = LoopConfig::new(eff.system_message.clone(), eff.model.model.clone());
    loop_config.max_tool_rounds = services.config.max_tool_rounds;
    let chat = ChatLoop::new(model.clone(), services.tools.clone(), loop_config);

    let mut history = s.history.clone();
    history.push(Message::user(text));
    tracing::info!(session_id = %id, model = %eff.model, history_len = history.len(), "chat turn");

    let image_job = async {
        if !eff.generate_image {
            return None;
        }
        illustrate(services, model.clone(), &eff.model.model, text).await
    };
    let (turn, image) = tokio::join!(chat.complete_turn(history), image_job);

    match turn {
        Ok(history) => {
            metrics::counter!("chatbot_turns_total", "outcome" => "ok").increment(1);
            s.commit_turn(history);
            Ok(Json(HistoryResponse { history: s.history.clone(), image }))
        }
        Err(e) => {
            metrics::counter!("chatbot_turns_total", "outcome" => e.kind()).increment(1);
            tracing::error!(session_id = %id, err = %e, "chat turn failed");
            Err(e.into())
        }
    }
}

/// Extracts places from the user's text and draws them. Never fails the turn.
async fn illustrate(services: &Services, model: Arc<dyn ChatModel>, model_name: &str, text: &str) -> Option<String> {
    let image_model: Arc<dyn ImageModel> = match services.providers.client(Provider::OpenAI) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(err = %e, "image generation skipped");
            return None;
        }
    };
    let places = match PlaceExtractor::new(model, model_name).extract_places(text).await {
        Ok(p) if !p.is_empty() => p,
        Ok(_) => return None,
        Err(e) => {
            tracing::warn!(err = %e, "place extraction failed");
            return None;
        }
    };
    let artist = ImageGenerator::new(image_model, services.config.image_model.clone(), services.config.image_prompt.clone());
    match artist.generate_image(&places).await {
        Ok(img) => {
            metrics::counter!("chatbot_images_total", "outcome" => "ok").increment(1);
            Some(img.to_data_url())
        }
        Err(e) => {
            metrics::counter!("chatbot_images_total", "outcome" => e.kind()).increment(1);
            tracing::warn!(err = %e, "image generation failed");
            None
        }
    }
}

async fn basic_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some((user, pass)) = &state.services.config.basic_auth else {
        return next.run(req).await;
    };
    let supplied = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64.trim()).ok())
        .and_then(|raw| String::from_utf8(raw).ok());
    if supplied.as_deref() == Some(format!("{}:{}", user, pass).as_str()) {
        return next.run(req).await;
    }
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"travel-chatbot\"")],
        "unauthorized",
    )
        .into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(render_metrics))
        .route("/v1/models", get(list_models))
        .route("/v1/sessions", post(create_session).get(list_sessions))
        .route("/v1/sessions/:id", axum::routing::delete(delete_session))
        .route("/v1/sessions/:id/settings", get(get_session_settings).patch(patch_session_settings))
        .route("/v1/sessions/:id/messages", get(get_history).post(post_message))
        .route_layer(middleware::from_fn_with_state(state.clone(), basic_auth))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "chat server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
