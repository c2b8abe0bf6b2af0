use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use murmur_shared::constants::CHANNEL_PATH;
use murmur_shared::{Message, MessageContent, User, UserId};

use crate::auth::AuthUser;
use crate::channel::channel_upgrade;
use crate::config::{ServerConfig, DEFAULT_CORS_ORIGIN};
use crate::error::{Result, ServerError};
use crate::registry::SessionRegistry;
use crate::router::MessageRouter;
use crate::store::{blocking, AuthContext, MessageStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub auth: Arc<dyn AuthContext>,
    pub registry: Arc<SessionRegistry>,
    pub router: Arc<MessageRouter>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MessageStore>,
        auth: Arc<dyn AuthContext>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let router = Arc::new(MessageRouter::new(store.clone(), registry.clone()));
        Self {
            store,
            auth,
            registry,
            router,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let origin = HeaderValue::from_str(&state.config.cors_origin).unwrap_or_else(|_| {
        warn!(origin = %state.config.cors_origin, "Invalid CORS_ORIGIN, using default");
        HeaderValue::from_static(DEFAULT_CORS_ORIGIN)
    });
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/check", get(check_auth))
        .route("/api/messages/users", get(list_users))
        .route("/api/messages/{peer_id}", get(get_messages))
        .route("/api/messages/send/{peer_id}", post(send_message))
        .route(CHANNEL_PATH, get(channel_upgrade))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn check_auth(AuthUser(me): AuthUser, State(state): State<AppState>) -> Result<Json<User>> {
    Ok(Json(blocking(&state.store, move |s| s.get_user(&me)).await?))
}

async fn list_users(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>> {
    Ok(Json(blocking(&state.store, move |s| s.list_users(&me)).await?))
}

async fn get_messages(
    AuthUser(me): AuthUser,
    Path(peer_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Message>>> {
    let peer = UserId(peer_id);
    let history = blocking(&state.store, move |s| {
        if !s.user_exists(&peer)? {
            return Err(ServerError::NotFound(format!("unknown user {peer}")));
        }
        s.list_messages(&me, &peer)
    })
    .await?;
    Ok(Json(history))
}

async fn send_message(
    AuthUser(me): AuthUser,
    Path(peer_id): Path<String>,
    State(state): State<AppState>,
    Json(content): Json<MessageContent>,
) -> Result<(StatusCode, Json<Message>)> {
    let message = state.router.on_send(&me, &UserId(peer_id), content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
