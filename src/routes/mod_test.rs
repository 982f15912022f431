use super::*;
use crate::db::handle::FailureKind;
use crate::db::test_helpers::test_target;
use crate::state::test_helpers::test_app_state;

async fn serve(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.expect("server failed");
    });
    format!("http://{addr}")
}

async fn fetch(url: &str) -> (u16, String) {
    let response = reqwest::get(url).await.expect("request should succeed");
    let status = response.status().as_u16();
    let body = response.text().await.expect("body should be readable");
    (status, body)
}

#[tokio::test]
async fn root_answers_without_database() {
    let (state, spy) = test_app_state(None);
    let base = serve(state).await;

    let (status, body) = fetch(&format!("{base}/")).await;
    assert_eq!(status, 200);
    assert_eq!(body, ROOT_BODY);
    assert_eq!(spy.calls(), 0);
}

#[tokio::test]
async fn root_answers_while_handshake_pending() {
    let (state, spy) = test_app_state(Some(test_target()));
    let base = serve(state).await;

    let (status, body) = fetch(&format!("{base}/")).await;
    assert_eq!(status, 200);
    assert_eq!(body, ROOT_BODY);
    assert_eq!(spy.calls(), 1, "requests must not create handles");
}

#[tokio::test]
async fn healthz_reports_absent_slot() {
    let (state, _spy) = test_app_state(None);
    let base = serve(state).await;

    let (status, body) = fetch(&format!("{base}/healthz")).await;
    assert_eq!(status, 503);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json, serde_json::json!({"status": "absent", "handle": null, "role": "primary"}));
}

#[tokio::test]
async fn healthz_reports_created_and_failed_handles() {
    let (state, spy) = test_app_state(Some(test_target()));
    let base = serve(state).await;

    let (status, body) = fetch(&format!("{base}/healthz")).await;
    assert_eq!(status, 503);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "created");
    assert_eq!(json["handle"], 1);

    spy.handle(0).fail(FailureKind::TransportLost, "reset");
    let (status, body) = fetch(&format!("{base}/healthz")).await;
    assert_eq!(status, 503);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "failed");
}
