use std::str::FromStr;

use anyhow::Result;
use rusqlite::Row;
use rusqlite::types::Type;

pub use rusqlite::types::Value;

/// Opaque row store reachable by query strings.
///
/// Each call is independent: a failure after a successful `execute` leaves the
/// earlier write in place.
pub trait Store: Send + Sync {
    /// Runs one write and returns the number of affected rows.
    fn execute(&self, query: &str, args: &[Value]) -> Result<usize>;

    /// Runs one read, mapping every returned row.
    fn query<T, F>(&self, query: &str, args: &[Value], map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>;
}

impl<S: Store> Store for &S {
    fn execute(&self, query: &str, args: &[Value]) -> Result<usize> {
        (**self).execute(query, args)
    }

    fn query<T, F>(&self, query: &str, args: &[Value], map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        (**self).query(query, args, map)
    }
}

pub fn text(v: impl ToString) -> Value {
    Value::Text(v.to_string())
}

pub fn int(v: i32) -> Value {
    Value::Integer(i64::from(v))
}

/// Reads a TEXT column and parses it, reporting bad data as a conversion error.
pub fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[derive(Debug, thiserror::Error)]
#[error("unexpected value '{0}'")]
pub struct UnknownVariant(pub String);

/// Reads a TEXT column holding a closed set of names.
pub fn enum_col<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(UnknownVariant(raw)))
    })
}
