use super::*;
use crate::db::handle::{FailureKind, HandleId};
use crate::db::test_helpers::{observer_pair, test_target};

fn created_handle() -> ConnectionHandle {
    let (observer, _rx) = observer_pair();
    ConnectionHandle::new(HandleId(1), test_target(), observer)
}

// =============================================================================
// UNAVAILABLE
// =============================================================================

#[tokio::test]
async fn absent_handle_is_unavailable() {
    let err = query_version(None).await.unwrap_err();
    assert_eq!(err, QueryError::Unavailable(UnavailableReason::NoHandle));
    assert!(err.is_unavailable());
    assert_eq!(err.error_code(), "E_UNAVAILABLE");
}

#[tokio::test]
async fn every_helper_short_circuits_without_handle() {
    assert!(query_in_recovery(None).await.unwrap_err().is_unavailable());
    assert!(query_by_id(None, 1).await.unwrap_err().is_unavailable());
    let fields = NewRecord { name: "Patrik Cain".into(), value: 155 };
    assert!(insert(None, &fields).await.unwrap_err().is_unavailable());
}

#[tokio::test]
async fn handshake_in_progress_is_not_ready() {
    let handle = created_handle();
    let err = query_by_id(Some(&handle), 1).await.unwrap_err();
    assert_eq!(err, QueryError::Unavailable(UnavailableReason::NotReady(HandleState::Created)));
}

#[tokio::test]
async fn failed_handle_is_not_ready() {
    let handle = created_handle();
    handle.fail(FailureKind::TransportLost, "reset");
    let err = query_version(Some(&handle)).await.unwrap_err();
    assert_eq!(err, QueryError::Unavailable(UnavailableReason::NotReady(HandleState::Failed)));
}

#[test]
fn query_failed_exposes_code() {
    let err = QueryError::QueryFailed { code: "42P01".into(), message: "relation \"records\" does not exist".into() };
    assert_eq!(err.error_code(), "42P01");
    assert!(!err.is_unavailable());
    assert_eq!(err.to_string(), "query failed: 42P01 - relation \"records\" does not exist");
}

#[test]
fn record_serializes_flat() {
    let record = Record { id: 7, name: "Patrik Cain".into(), value: 155 };
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json, serde_json::json!({"id": 7, "name": "Patrik Cain", "value": 155}));
}

// =============================================================================
// LIVE DATABASE
// =============================================================================

#[cfg(feature = "live-db-tests")]
mod live {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::db::handle::{ConnectionFactory, PgConnectionFactory};
    use crate::db::run_migrations;
    use crate::db::supervisor::{ReconnectPolicy, ShutdownOutcome, Supervisor};
    use crate::db::target::{Role, resolve_with};

    fn live_url() -> String {
        std::env::var("TEST_DATABASE_URL").unwrap_or_else(|_| crate::db::test_helpers::TEST_URL.to_string())
    }

    async fn connected_supervisor() -> Supervisor {
        let url = live_url();
        let target = resolve_with(move |key| (key == "postgresql_connectionString").then(|| url.clone()), "postgresql", Role::Primary)
            .expect("TEST_DATABASE_URL should resolve");
        run_migrations(&target).await.expect("migrations should run");

        let factory: Arc<dyn ConnectionFactory> = Arc::new(PgConnectionFactory::new(Duration::from_secs(5)));
        let (supervisor, _task) = Supervisor::start(Some(target), factory, ReconnectPolicy::default());

        let mut rx = supervisor.subscribe();
        timeout(
            Duration::from_secs(10),
            rx.wait_for(|slot| slot.as_ref().is_some_and(|h| h.state() == HandleState::Connected)),
        )
        .await
        .expect("requires reachable Postgres; set TEST_DATABASE_URL")
        .expect("supervisor alive");

        supervisor
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn insert_then_query_by_id_round_trips() {
        let supervisor = connected_supervisor().await;
        let handle = supervisor.current();

        let fields = NewRecord { name: "Patrik Cain".into(), value: 155 };
        let id = insert(handle.as_deref(), &fields).await.expect("insert should succeed");

        let rows = query_by_id(handle.as_deref(), id).await.expect("select should succeed");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], Record { id, name: "Patrik Cain".into(), value: 155 });

        assert_eq!(supervisor.shutdown().await, ShutdownOutcome::Released(HandleId(1)));
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn version_and_recovery_queries_answer() {
        let supervisor = connected_supervisor().await;
        let handle = supervisor.current();

        let version = query_version(handle.as_deref()).await.expect("version should succeed");
        assert!(version.starts_with("PostgreSQL"), "unexpected version: {version}");
        assert!(!query_in_recovery(handle.as_deref()).await.expect("recovery flag should succeed"));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn missing_row_yields_empty_result() {
        let supervisor = connected_supervisor().await;
        let rows = query_by_id(supervisor.current().as_deref(), -1).await.expect("select should succeed");
        assert!(rows.is_empty());
        supervisor.shutdown().await;
    }
}
