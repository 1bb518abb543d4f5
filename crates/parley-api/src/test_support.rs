use anyhow::{Result, bail};
use rusqlite::Row;

use parley_db::{Database, Store, StoreExt, Value, statements};
use parley_types::UserId;

/// Delegates to a real database but fails every write whose query contains
/// `fail_on`.
pub struct FailingStore<'a> {
    pub inner: &'a Database,
    pub fail_on: &'static str,
}

impl Store for FailingStore<'_> {
    fn execute(&self, query: &str, args: &[Value]) -> Result<usize> {
        if query.contains(self.fail_on) {
            bail!("injected failure on '{}'", self.fail_on);
        }
        self.inner.execute(query, args)
    }

    fn query<T, F>(&self, query: &str, args: &[Value], map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.inner.query(query, args, map)
    }
}

pub fn seed_user(db: &Database, username: &str) -> UserId {
    let id = UserId::new();
    db.run(&statements::insert_user(id, &format!("{username}@example.com"), username, "hash"))
        .unwrap();
    id
}

pub fn count(db: &Database, table: &str) -> i64 {
    let query = format!("SELECT COUNT(*) FROM {table}");
    db.query(&query, &[], |row| row.get::<_, i64>(0)).unwrap()[0]
}
