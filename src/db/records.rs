//! Query helpers over whatever handle is current at call time.
//!
//! DESIGN
//! ======
//! Every helper takes the handle as an explicit `Option<&ConnectionHandle>`
//! and maps to exactly one parameterized statement. A missing or not-yet
//! connected handle is an expected steady state (startup, rebuild window),
//! so it returns `QueryError::Unavailable` without touching the network.
//! Driver errors come back as `QueryError::QueryFailed`; recovery is the
//! supervisor's job, driven by the handle's own failure observer.

use serde::Serialize;
use tokio_postgres::{Client, Row};

use super::handle::{ConnectionHandle, HandleState};

const SELECT_VERSION: &str = "SELECT version()";
const SELECT_IN_RECOVERY: &str = "SELECT pg_is_in_recovery()";
const SELECT_RECORD_BY_ID: &str = "SELECT * FROM records WHERE id = $1";
const INSERT_RECORD: &str = "INSERT INTO records(name, value) VALUES($1, $2) RETURNING id";

// =============================================================================
// TYPES
// =============================================================================

/// One row of the `records` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: i32,
    pub name: String,
    pub value: i32,
}

/// Fields for a new `records` row; the id is generated by the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRecord {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The slot is empty.
    NoHandle,
    /// The handle exists but is not `Connected`.
    NotReady(HandleState),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("database unavailable: {0:?}")]
    Unavailable(UnavailableReason),

    #[error("query failed: {code} - {message}")]
    QueryFailed { code: String, message: String },
}

impl QueryError {
    #[must_use]
    pub fn error_code(&self) -> &str {
        match self {
            Self::Unavailable(_) => "E_UNAVAILABLE",
            Self::QueryFailed { code, .. } => code,
        }
    }

    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<tokio_postgres::Error> for QueryError {
    fn from(e: tokio_postgres::Error) -> Self {
        let code = match e.code() {
            Some(state) => state.code().to_string(),
            None if e.is_closed() => "E_CONNECTION_CLOSED".to_string(),
            None => "E_TRANSPORT".to_string(),
        };
        let message = e
            .as_db_error()
            .map_or_else(|| e.to_string(), |db| db.message().to_string());
        Self::QueryFailed { code, message }
    }
}

// =============================================================================
// QUERIES
// =============================================================================

fn ready(handle: Option<&ConnectionHandle>) -> Result<&Client, QueryError> {
    let handle = handle.ok_or(QueryError::Unavailable(UnavailableReason::NoHandle))?;
    handle
        .client()
        .ok_or_else(|| QueryError::Unavailable(UnavailableReason::NotReady(handle.state())))
}

/// Server version string.
pub async fn query_version(handle: Option<&ConnectionHandle>) -> Result<String, QueryError> {
    let client = ready(handle)?;
    let row = client.query_one(SELECT_VERSION, &[]).await?;
    Ok(row.try_get(0)?)
}

/// Whether the server is a standby in recovery.
pub async fn query_in_recovery(handle: Option<&ConnectionHandle>) -> Result<bool, QueryError> {
    let client = ready(handle)?;
    let row = client.query_one(SELECT_IN_RECOVERY, &[]).await?;
    Ok(row.try_get(0)?)
}

/// Rows of `records` with the given id (zero or one).
pub async fn query_by_id(handle: Option<&ConnectionHandle>, id: i32) -> Result<Vec<Record>, QueryError> {
    let client = ready(handle)?;
    let rows = client.query(SELECT_RECORD_BY_ID, &[&id]).await?;
    rows.iter().map(record_from_row).collect()
}

/// Insert a record and return the generated id.
pub async fn insert(handle: Option<&ConnectionHandle>, fields: &NewRecord) -> Result<i32, QueryError> {
    let client = ready(handle)?;
    let row = client
        .query_one(INSERT_RECORD, &[&fields.name, &fields.value])
        .await?;
    Ok(row.try_get("id")?)
}

fn record_from_row(row: &Row) -> Result<Record, QueryError> {
    Ok(Record { id: row.try_get("id")?, name: row.try_get("name")?, value: row.try_get("value")? })
}

#[cfg(test)]
#[path = "records_test.rs"]
mod tests;
