//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

use crate::app::AppState;
use crate::arena::{ArenaDefinition, ArenaError, SpawnSlot};
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::matchmaking::DuelError;
use crate::store::DuelStats;
use crate::util::time::uptime_secs;
use crate::world::{Location, World};
use crate::ws::handler::ws_handler;
use crate::ws::protocol::DuelSummary;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/duel/challenge", post(challenge_handler))
        .route("/duel/accept", post(accept_handler))
        .route("/duel/deny", post(deny_handler))
        .route("/duel/cancel", post(cancel_handler))
        .route("/duel/return", post(return_handler))
        .route("/queue", get(queue_status_handler))
        .route("/queue/join", post(queue_join_handler))
        .route("/queue/leave", post(queue_leave_handler))
        .route("/duels", get(duels_handler))
        .route("/duels/me", get(my_duel_handler))
        .route("/stats/me", get(my_stats_handler))
        .route("/arenas", get(list_arenas_handler).post(create_arena_handler))
        .route("/arenas/:name", delete(delete_arena_handler))
        .route("/arenas/:name/edit", post(begin_edit_handler))
        .route("/arenas/edit/spawn", post(edit_spawn_handler))
        .route("/arenas/edit/done", post(end_edit_handler))
        .route("/lobby", get(get_lobby_handler).post(set_lobby_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_duels: usize,
    connected: usize,
    queue_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_size = state.coordinator.queue_size().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_duels: state.coordinator.active_duels().len(),
        connected: state.hub.session_count(),
        queue_size,
    })
}

// ============================================================================
// Duel endpoints
// ============================================================================

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

fn ok() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

#[derive(Deserialize)]
struct ChallengeRequest {
    target: String,
}

#[derive(Deserialize)]
struct ChallengerRequest {
    challenger: String,
}

async fn challenge_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<ChallengeRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    state
        .coordinator
        .send_request(auth.participant_id, &req.target)?;
    Ok(ok())
}

async fn accept_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<ChallengerRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    state
        .coordinator
        .accept_request(auth.participant_id, &req.challenger)?;
    Ok(ok())
}

async fn deny_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<ChallengerRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    state
        .coordinator
        .deny_request(auth.participant_id, &req.challenger)?;
    Ok(ok())
}

async fn cancel_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<StatusResponse>, AppError> {
    state.coordinator.cancel_request(auth.participant_id)?;
    Ok(ok())
}

async fn return_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<StatusResponse>, AppError> {
    state.coordinator.return_now(auth.participant_id)?;
    Ok(ok())
}

async fn duels_handler(State(state): State<AppState>) -> Json<Vec<DuelSummary>> {
    Json(state.coordinator.active_duels())
}

async fn my_duel_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<DuelSummary>, AppError> {
    state
        .coordinator
        .active_duel(auth.participant_id)
        .map(|duel| Json(duel.summary()))
        .ok_or_else(|| AppError::NotFound(DuelError::NotInDuel.to_string()))
}

async fn my_stats_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<DuelStats>, AppError> {
    let stats = state
        .coordinator
        .stats(auth.participant_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(stats))
}

// ============================================================================
// Queue endpoints
// ============================================================================

#[derive(Serialize)]
struct QueueResponse {
    position: Option<usize>,
    size: usize,
}

async fn queue_status_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<QueueResponse> {
    let position = state.coordinator.queue_position(auth.participant_id).await;
    let size = state.coordinator.queue_size().await;
    Json(QueueResponse { position, size })
}

async fn queue_join_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<QueueResponse>, AppError> {
    let position = state.coordinator.join_queue(auth.participant_id).await?;
    let size = state.coordinator.queue_size().await;
    Ok(Json(QueueResponse {
        position: Some(position),
        size,
    }))
}

async fn queue_leave_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<StatusResponse>, AppError> {
    state.coordinator.leave_queue(auth.participant_id).await?;
    Ok(ok())
}

// ============================================================================
// Arena endpoints
// ============================================================================

#[derive(Deserialize)]
struct CreateArenaRequest {
    name: String,
}

#[derive(Deserialize)]
struct EditSpawnRequest {
    slot: SpawnSlot,
}

#[derive(Serialize)]
struct EditResponse {
    editing: String,
    /// Arena whose claim was replaced
    previous: Option<String>,
}

/// Where the caller is standing in the game
fn caller_location(state: &AppState, auth: &AuthenticatedUser) -> Result<Location, AppError> {
    state
        .world
        .location(auth.participant_id)
        .ok_or_else(|| AppError::BadRequest("Connect to the game first".to_string()))
}

async fn list_arenas_handler(State(state): State<AppState>) -> Json<Vec<ArenaDefinition>> {
    Json(state.catalog.list())
}

async fn create_arena_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateArenaRequest>,
) -> Result<(StatusCode, Json<ArenaDefinition>), AppError> {
    let arena = state.catalog.create(&req.name).await?;
    Ok((StatusCode::CREATED, Json(arena)))
}

async fn delete_arena_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.catalog.delete(&name).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ArenaError::NotFound(name).into())
    }
}

async fn begin_edit_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
) -> Result<Json<EditResponse>, AppError> {
    let previous = state.catalog.begin_edit(auth.participant_id, &name)?;
    let editing = state
        .catalog
        .editing(auth.participant_id)
        .unwrap_or(name);
    Ok(Json(EditResponse { editing, previous }))
}

async fn edit_spawn_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<EditSpawnRequest>,
) -> Result<Json<ArenaDefinition>, AppError> {
    let location = caller_location(&state, &auth)?;
    let arena = state
        .catalog
        .set_edit_spawn(auth.participant_id, req.slot, location)
        .await?;
    Ok(Json(arena))
}

async fn end_edit_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<ArenaDefinition>, AppError> {
    let name = state.catalog.end_edit(auth.participant_id)?;
    state
        .catalog
        .get(&name)
        .map(Json)
        .ok_or(AppError::NotFound(name))
}

async fn get_lobby_handler(State(state): State<AppState>) -> Json<Option<Location>> {
    Json(state.catalog.lobby())
}

async fn set_lobby_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<Location>, AppError> {
    let location = caller_location(&state, &auth)?;
    state.catalog.set_lobby(location.clone()).await?;
    Ok(Json(location))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DuelError> for AppError {
    fn from(err: DuelError) -> Self {
        match err {
            DuelError::UnknownTarget(_)
            | DuelError::NoPendingRequest(_)
            | DuelError::NoOutgoingRequest
            | DuelError::NotQueued
            | DuelError::NotInDuel => AppError::NotFound(err.to_string()),
            DuelError::SelfChallenge | DuelError::NothingToReturn => {
                AppError::BadRequest(err.to_string())
            }
            _ => AppError::Conflict(err.to_string()),
        }
    }
}

impl From<ArenaError> for AppError {
    fn from(err: ArenaError) -> Self {
        match err {
            ArenaError::InvalidName | ArenaError::NotEditing => AppError::BadRequest(err.to_string()),
            ArenaError::NotFound(_) => AppError::NotFound(err.to_string()),
            ArenaError::DuplicateName(_) | ArenaError::ArenaClaimed(_) => {
                AppError::Conflict(err.to_string())
            }
            ArenaError::Store(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::app::test_state;
    use crate::config::DuelConfig;
    use crate::http::middleware::tests::sign;
    use crate::util::time::unix_millis;

    fn token_for(state: &AppState, id: Uuid, name: &str) -> String {
        let claims = serde_json::json!({
            "sub": id,
            "exp": unix_millis() / 1000 + 600,
            "name": name,
        });
        sign(&claims, &state.config.jwt_secret)
    }

    fn request(method: Method, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let state = test_state(DuelConfig::default());
        let response = build_router(state)
            .oneshot(request(Method::GET, "/health", None, serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_duels"], 0);
    }

    #[tokio::test]
    async fn test_protected_routes_need_token() {
        let state = test_state(DuelConfig::default());
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(request(Method::GET, "/duels", None, serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(request(Method::GET, "/duels", Some("not.a.token"), serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_arena_editing_flow() {
        let state = test_state(DuelConfig::default());
        let id = Uuid::new_v4();
        state.world.connect(id, "Builder");
        let token = token_for(&state, id, "Builder");
        let router = build_router(state.clone());

        let create = request(Method::POST, "/arenas", Some(&token), serde_json::json!({ "name": "Pit" }));
        let response = router.clone().oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let duplicate = request(Method::POST, "/arenas", Some(&token), serde_json::json!({ "name": "pit" }));
        let response = router.clone().oneshot(duplicate).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let spawn = request(Method::POST, "/arenas/edit/spawn", Some(&token), serde_json::json!({ "slot": "a" }));
        let response = router.clone().oneshot(spawn).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let edit = request(Method::POST, "/arenas/pit/edit", Some(&token), serde_json::Value::Null);
        let response = router.clone().oneshot(edit).await.unwrap();
        assert_eq!(json_body(response).await["editing"], "Pit");

        let spawn = request(Method::POST, "/arenas/edit/spawn", Some(&token), serde_json::json!({ "slot": "a" }));
        let response = router.clone().oneshot(spawn).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.catalog.get("pit").unwrap().spawn_a.is_some());

        let done = request(Method::POST, "/arenas/edit/done", Some(&token), serde_json::Value::Null);
        let response = router.clone().oneshot(done).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.catalog.editing(id).is_none());

        let remove = request(Method::DELETE, "/arenas/pit", Some(&token), serde_json::Value::Null);
        let response = router.oneshot(remove).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.catalog.list().is_empty());
    }

    #[tokio::test]
    async fn test_queue_and_duel_errors_map_to_status() {
        let state = test_state(DuelConfig::default());
        let id = Uuid::new_v4();
        state.world.connect(id, "Alex");
        let token = token_for(&state, id, "Alex");
        let router = build_router(state);

        let join = request(Method::POST, "/queue/join", Some(&token), serde_json::Value::Null);
        let response = router.clone().oneshot(join).await.unwrap();
        assert_eq!(json_body(response).await["position"], 1);

        let again = request(Method::POST, "/queue/join", Some(&token), serde_json::Value::Null);
        let response = router.clone().oneshot(again).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let mine = request(Method::GET, "/duels/me", Some(&token), serde_json::Value::Null);
        let response = router.clone().oneshot(mine).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let stats = request(Method::GET, "/stats/me", Some(&token), serde_json::Value::Null);
        let response = router.oneshot(stats).await.unwrap();
        assert_eq!(json_body(response).await["wins"], 0);
    }
}
