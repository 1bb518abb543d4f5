use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{debug, info};
use uuid::Uuid;

use parley_db::models::SessionRow;
use parley_db::{Store, StoreExt, statements};
use parley_gateway::SESSION_COOKIE;
use parley_gateway::topology::load_user_servers;
use parley_types::UserId;
use parley_types::api::{LoginRequest, RegisterRequest, RegisterResponse};
use parley_types::models::{ServerSummary, UserProfile};

use crate::middleware::AuthUser;
use crate::{ApiError, AppState, blocking};

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest("username must be 3 to 32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }
    match req.email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ApiError::BadRequest("invalid email address".into())),
    }
}

pub fn register_user<S: Store>(store: &S, req: &RegisterRequest) -> Result<UserId, ApiError> {
    validate_registration(req)?;

    if store.user_exists(&req.username, &req.email)? {
        return Err(ApiError::Conflict("username or email already taken"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = UserId::new();
    store.run(&statements::insert_user(user_id, &req.email, &req.username, &password_hash))?;
    info!("Registered {} as {}", req.username, user_id);
    Ok(user_id)
}

/// Checks the credentials and stores a new session row for them.
pub fn open_session<S: Store>(
    store: &S,
    req: &LoginRequest,
    user_agent: &str,
) -> Result<(SessionRow, UserProfile), ApiError> {
    let user = store
        .find_user_by_email(&req.email)?
        .ok_or(ApiError::Unauthenticated)?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} is unreadable: {}", user.id, e))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| {
            debug!("Wrong password for {}", user.id);
            ApiError::Unauthenticated
        })?;

    let session = SessionRow {
        session_id: Uuid::new_v4().to_string(),
        user_id: user.id,
        timezone: req.timezone.clone(),
        user_agent: user_agent.to_string(),
    };
    store.run(&statements::insert_session(&session))?;

    Ok((session, user.into()))
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = blocking(move || register_user(&*db, &req)).await?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let db = state.db.clone();
    let (session, profile) = blocking(move || open_session(&*db, &req, &user_agent)).await?;
    let token = state.sessions.issue(&session)?;

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .path("/")
        .same_site(SameSite::Lax);

    info!("{} logged in (session {})", profile.id, session.session_id);
    Ok((jar.add(cookie), Json(profile)))
}

/// The profile behind the current session cookie.
pub async fn check(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<UserProfile>, ApiError> {
    let db = state.db.clone();
    let user = blocking(move || Ok(db.find_user(user_id)?)).await?;

    // A valid session for a deleted user is treated as no session.
    user.map(|row| Json(row.into())).ok_or(ApiError::Unauthenticated)
}

pub async fn servers(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Vec<ServerSummary>>, ApiError> {
    let db = state.db.clone();
    let servers = blocking(move || Ok(load_user_servers(&*db, user_id)?)).await?;
    Ok(Json(servers))
}
