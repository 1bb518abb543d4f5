use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use parley_gateway::SESSION_COOKIE;
use parley_types::UserId;

use crate::{ApiError, AppState};

/// The authenticated caller, inserted by [`require_auth`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

/// Validate the session cookie against the stored session row.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or(ApiError::Unauthenticated)?;

    let user_id = state.sessions.validate_shared(state.db.clone(), token).await?;

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}
