mod common;

use axum::http::{Request, StatusCode};
use common::Harness;
use ton_watcher::api::{build_router, request_id_header};
use tower::ServiceExt;

fn status_request() -> axum::http::request::Builder {
    Request::builder().uri("/status")
}

#[tokio::test]
async fn test_custom_request_id_header_roundtrip() {
    let app = build_router(Harness::new().app_state());
    let req = status_request()
        .header(request_id_header(), "test-rid-123")
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    // an incoming id is kept, not replaced
    let got = res
        .headers()
        .get(request_id_header())
        .and_then(|v| v.to_str().ok());
    assert_eq!(got, Some("test-rid-123"));
}

#[tokio::test]
async fn test_request_id_is_generated_when_missing() {
    let app = build_router(Harness::new().app_state());
    let req = status_request().body(axum::body::Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    let got = res
        .headers()
        .get(request_id_header())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(uuid::Uuid::parse_str(&got).is_ok(), "got {got:?}");
}

#[tokio::test]
async fn test_error_responses_carry_request_id() {
    let app = build_router(Harness::new().app_state());
    let req = Request::builder()
        .uri("/addresses/garbage")
        .header(request_id_header(), "rid-err")
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        res.headers()
            .get(request_id_header())
            .and_then(|v| v.to_str().ok()),
        Some("rid-err")
    );
}
