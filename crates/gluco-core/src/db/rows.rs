//! Row decoding and statement helpers shared by the repositories

use std::future::Future;
use std::str::FromStr;

use libsql::{Connection, Row, Value};

use crate::error::{Error, Result};

/// Nullable INTEGER column
pub fn opt_i64(row: &Row, index: i32) -> Result<Option<i64>> {
    match row.get_value(index)? {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "expected integer in column {index}, got {other:?}"
        ))),
    }
}

/// Nullable TEXT column
pub fn opt_text(row: &Row, index: i32) -> Result<Option<String>> {
    match row.get_value(index)? {
        Value::Null => Ok(None),
        Value::Text(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "expected text in column {index}, got {other:?}"
        ))),
    }
}

/// Bind an optional value, mapping `None` to SQL NULL
pub fn opt_value<T: Into<Value>>(value: Option<T>) -> Value {
    value.map_or(Value::Null, Into::into)
}

/// Parse a TEXT column into a domain type
pub fn parse_column<T>(raw: &str, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|error| Error::Database(format!("invalid {what} '{raw}': {error}")))
}

/// Run `work` inside `BEGIN` / `COMMIT`, rolling back if it fails
pub async fn in_transaction<'c, T, F, Fut>(conn: &'c Connection, work: F) -> Result<T>
where
    F: FnOnce(&'c Connection) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    conn.execute("BEGIN TRANSACTION", ()).await?;

    match work(conn).await {
        Ok(value) => {
            if let Err(e) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
            Ok(value)
        }
        Err(error) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(error)
        }
    }
}
