mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderValue, Method, header},
    middleware,
    response::Response,
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::middleware::require_auth;
use parley_api::{ApiError, AppState, AppStateInner, auth, channels, messages, servers};
use parley_gateway::{Broadcaster, ConnectionRegistry, SESSION_COOKIE, SessionValidator, connection};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(parley_db::Database::open(&config.db_path)?);
    let registry = ConnectionRegistry::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        sessions: SessionValidator::new(&config.secret, config.session_ttl),
        broadcaster: Broadcaster::new(registry),
    });

    let public_routes = Router::new()
        .route("/api/user", post(auth::register))
        .route("/api/user/login", post(auth::login))
        .route("/ws/connect", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/api/user/check", get(auth::check))
        .route("/api/user/servers", get(auth::servers))
        .route("/api/servers", post(servers::create))
        .route("/api/delete_server", post(servers::delete))
        .route("/api/servers/{server_id}/invitations", post(servers::invite))
        .route("/api/join_server", post(servers::join))
        .route("/api/leave_server", post(servers::leave))
        .route("/api/update_server_state", post(servers::update_state))
        .route("/api/get_last_servers_state", get(servers::get_state))
        .route("/api/channels", post(channels::create))
        .route("/api/delete_channel", post(channels::delete))
        .route("/api/channels/{server_id}", get(channels::topology))
        .route("/api/new_message/{server_id}/{channel_id}", post(messages::send_message))
        .route("/api/new_dm/{channel_id}", post(messages::send_direct_message))
        .route("/api/messages/{channel_id}", get(messages::get_messages))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let cors = CorsLayer::new()
        .allow_origin(config.allowed_origin.parse::<HeaderValue>()?)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors));

    info!("Parley server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Admits a socket only for a valid session cookie; anything else is refused
/// before the upgrade.
async fn ws_upgrade(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or(ApiError::Unauthenticated)?;
    let user_id = state.sessions.validate_shared(state.db.clone(), token).await?;

    let db = state.db.clone();
    let registry = state.broadcaster.registry().clone();
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, db, registry, user_id)))
}
