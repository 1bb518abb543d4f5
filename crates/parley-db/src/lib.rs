pub mod migrations;
pub mod models;
pub mod queries;
pub mod saga;
pub mod statements;
pub mod store;

use anyhow::Result;
use rusqlite::{Connection, Row, params_from_iter};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub use queries::StoreExt;
pub use saga::{Compensation, RollbackReport, Saga, SagaError};
pub use statements::Statement;
pub use store::{Store, Value};

/// SQLite-backed store. Every call locks the connection for exactly one
/// statement; there are no multi-statement transactions, so callers that need
/// several writes to stand or fall together go through a [`Saga`].
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }
}

impl Store for Database {
    fn execute(&self, query: &str, args: &[Value]) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute(query, params_from_iter(args.iter()))?))
    }

    fn query<T, F>(&self, query: &str, args: &[Value], map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(query)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), map)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
