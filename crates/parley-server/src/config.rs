use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

const DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub allowed_origin: String,
    pub session_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`, falling back to development defaults
    /// for anything unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("PARLEY_HOST", "0.0.0.0");
        let port: u16 = var("PARLEY_PORT", "3000")
            .parse()
            .context("PARLEY_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let days: u64 = var("PARLEY_SESSION_DAYS", "3")
            .parse()
            .context("PARLEY_SESSION_DAYS must be a whole number of days")?;

        Ok(Self {
            secret: var("PARLEY_SECRET", "dev-secret-change-me"),
            db_path: PathBuf::from(var("PARLEY_DB_PATH", "parley.db")),
            addr,
            allowed_origin: var("PARLEY_ALLOWED_ORIGIN", "http://localhost:5173"),
            session_ttl: Duration::from_secs(days * DAY),
        })
    }
}
