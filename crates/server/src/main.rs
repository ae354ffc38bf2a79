use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use server_api::{auth, messages, presence::PresenceRegistry, session::SessionKeys, ApiContext};
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
    protocol::{
        LoginRequest, MessagePayload, PublicProfile, SendMessageRequest, SignupRequest,
        UpdateProfileRequest,
    },
};
use storage::Storage;
use uploads::S3ImageStore;

mod config;
mod session;
mod ws;

use config::{load_settings, prepare_database_url, Settings};
use session::{clear_session_cookie, session_cookie, AuthUser};

/// Matches the JSON body limit the client needs for inline image payloads.
const MAX_JSON_BODY_BYTES: usize = 50 * 1024 * 1024;

pub struct AppState {
    api: ApiContext,
    secure_cookies: bool,
    environment: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|err| {
        error!(
            %database_url,
            error = %err,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        err
    })?;
    let images = S3ImageStore::new(
        &settings.s3_endpoint,
        &settings.s3_bucket,
        &settings.s3_access_key,
        &settings.s3_secret_key,
        &settings.s3_region,
        &settings.s3_public_base_url,
    )
    .await?;

    let api = ApiContext {
        storage,
        images: Arc::new(images),
        presence: Arc::new(PresenceRegistry::new()),
        sessions: SessionKeys::new(&settings.jwt_secret),
    };
    let state = Arc::new(AppState {
        api,
        secure_cookies: settings.is_production(),
        environment: settings.environment.clone(),
    });

    let app = build_router(state)
        .layer(cors_layer(&settings)?)
        .layer(DefaultBodyLimit::max(MAX_JSON_BODY_BYTES))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, environment = %settings.environment, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/signup", post(http_signup))
        .route("/api/auth/login", post(http_login))
        .route("/api/auth/logout", post(http_logout))
        .route("/api/auth/check", get(http_check))
        .route("/api/auth/update-profile", put(http_update_profile))
        .route("/api/messages/users", get(http_roster))
        .route("/api/messages/:id", get(http_conversation))
        .route("/api/messages/send/:id", post(http_send_message))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

fn cors_layer(settings: &Settings) -> anyhow::Result<CorsLayer> {
    let origin: HeaderValue = settings
        .client_origin
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid client origin: {}", settings.client_origin))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received; closing server");
}

type Rejection = (StatusCode, Json<ApiError>);

fn reject(err: ApiError) -> Rejection {
    (status_for(&err.code), Json(err))
}

fn status_for(code: &ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation | ErrorCode::Upload => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "Server is running",
        "environment": state.environment,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn http_signup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let profile = auth::signup(&state.api, &request).await.map_err(reject)?;
    let token = state.api.sessions.issue(profile.id).map_err(reject)?;
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, session_cookie(&token, state.secure_cookies))],
        Json(profile),
    ))
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let profile = auth::login(&state.api, &request).await.map_err(reject)?;
    let token = state.api.sessions.issue(profile.id).map_err(reject)?;
    Ok((
        [(header::SET_COOKIE, session_cookie(&token, state.secure_cookies))],
        Json(profile),
    ))
}

async fn http_logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, clear_session_cookie(state.secure_cookies))],
        Json(serde_json::json!({ "message": "logged out successfully" })),
    )
}

async fn http_check(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicProfile>, Rejection> {
    let profile = auth::current_user(&state.api, user_id)
        .await
        .map_err(reject)?;
    Ok(Json(profile))
}

async fn http_update_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<PublicProfile>, Rejection> {
    let profile = auth::update_profile(&state.api, user_id, &request)
        .await
        .map_err(reject)?;
    Ok(Json(profile))
}

async fn http_roster(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<PublicProfile>>, Rejection> {
    let roster = messages::roster(&state.api, user_id)
        .await
        .map_err(reject)?;
    Ok(Json(roster))
}

async fn http_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(other_id): Path<i64>,
) -> Result<Json<Vec<MessagePayload>>, Rejection> {
    let history = messages::conversation(&state.api, user_id, UserId(other_id))
        .await
        .map_err(reject)?;
    Ok(Json(history))
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(receiver_id): Path<i64>,
    Json(request): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let message = messages::send_message(&state.api, user_id, UserId(receiver_id), &request)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(message)))
}
