pub mod auth;
pub mod channels;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod servers;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use parley_db::Database;
use parley_gateway::{Broadcaster, SessionValidator};

pub use error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionValidator,
    pub broadcaster: Broadcaster,
}

/// Runs a blocking store operation off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
    })?
}
