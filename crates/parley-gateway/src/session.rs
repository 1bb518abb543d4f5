use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use parley_db::models::SessionRow;
use parley_db::{Store, StoreExt};
use parley_types::UserId;
use parley_types::api::SessionClaims;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Verifies session tokens against the stored session rows.
#[derive(Clone)]
pub struct SessionValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionValidator {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        // Only the HMAC family is accepted, whatever the token header claims.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    /// Returns the user the token belongs to if its signature, algorithm and
    /// expiry are valid and every claim matches the stored session exactly.
    pub fn validate<S: Store>(&self, store: &S, token: &str) -> Result<UserId, AuthError> {
        let claims = decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                debug!("Rejected session token: {}", e);
                AuthError::Unauthenticated
            })?
            .claims;

        let Some(session) = store.find_session(&claims.session_id)? else {
            debug!("No session {} for {}", claims.session_id, claims.user_id);
            return Err(AuthError::Unauthenticated);
        };

        if !matches_claims(&session, &claims) {
            debug!("Session {} does not match its token claims", claims.session_id);
            return Err(AuthError::Unauthenticated);
        }

        Ok(session.user_id)
    }

    /// [`Self::validate`] off the async runtime.
    pub async fn validate_shared<S: Store + 'static>(
        &self,
        store: Arc<S>,
        token: String,
    ) -> Result<UserId, AuthError> {
        let validator = self.clone();
        tokio::task::spawn_blocking(move || validator.validate(&*store, &token))
            .await
            .map_err(|e| AuthError::Store(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
    }

    /// Signs a token for a freshly stored session.
    pub fn issue(&self, session: &SessionRow) -> anyhow::Result<String> {
        let exp = jsonwebtoken::get_current_timestamp() + self.ttl.as_secs();
        let claims = SessionClaims {
            session_id: session.session_id.clone(),
            user_id: session.user_id,
            timezone: session.timezone.clone(),
            user_agent: session.user_agent.clone(),
            exp: exp as usize,
        };

        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }
}

fn matches_claims(session: &SessionRow, claims: &SessionClaims) -> bool {
    session.session_id == claims.session_id
        && session.user_id == claims.user_id
        && session.timezone == claims.timezone
        && session.user_agent == claims.user_agent
}
