//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The HTTP surface is a thin collaborator of the database layer. `/` runs
//! the query helpers against the current handle and logs what happened;
//! it answers with the same acknowledgement whether or not the database is
//! reachable. `/healthz` reports the handle state for probes.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::db::handle::{HandleId, HandleState};
use crate::db::records::{self, QueryError};
use crate::db::target::Role;
use crate::state::AppState;

pub const ROOT_BODY: &str = "... PostgreSQL database access from Rust";

/// Record probed by the root route.
const PROBE_RECORD_ID: i32 = 1;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> &'static str {
    let handle = state.handle();
    let handle = handle.as_deref();

    match records::query_version(handle).await {
        Ok(version) => info!(%version, "server version"),
        Err(e) => log_query_error("version", &e),
    }

    match records::query_in_recovery(handle).await {
        Ok(in_recovery) => info!(in_recovery, "recovery state"),
        Err(e) => log_query_error("recovery state", &e),
    }

    match records::query_by_id(handle, PROBE_RECORD_ID).await {
        Ok(rows) if rows.is_empty() => info!(id = PROBE_RECORD_ID, "no rows found"),
        Ok(rows) => info!(id = PROBE_RECORD_ID, ?rows, "selected rows"),
        Err(e) => log_query_error("select record", &e),
    }

    ROOT_BODY
}

fn log_query_error(what: &str, e: &QueryError) {
    if e.is_unavailable() {
        warn!(query = what, error = %e, "PostgreSQL client not ready");
    } else {
        error!(query = what, code = e.error_code(), error = %e, "request to PostgreSQL failed");
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub handle: Option<HandleId>,
    pub role: Role,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let (status, handle) = match state.handle() {
        None => ("absent", None),
        Some(h) => {
            let status = match h.state() {
                HandleState::Created => "created",
                HandleState::Connected => "connected",
                HandleState::Failed => "failed",
            };
            (status, Some(h.id()))
        }
    };
    let code = if status == "connected" { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(Health { status, handle, role: state.role }))
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
