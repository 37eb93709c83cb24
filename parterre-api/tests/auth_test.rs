use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use parterre_api::auth::CurrentUser;
use parterre_api::error::AppError;
use tower::ServiceExt;

fn test_app() -> Router {
    Router::new()
        .route("/whoami", get(|CurrentUser(user): CurrentUser| async move { user }))
        .route("/missing", get(|| async { AppError::NotFound("no such thing".to_string()) }))
}

#[tokio::test]
async fn test_request_without_identity_is_unauthorized() {
    let response = test_app()
        .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = to_bytes(response.into_body(), 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("X-User-ID"));
}

#[tokio::test]
async fn test_header_identity_is_extracted() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/whoami")
                .header("X-User-ID", "u42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"u42");
}

#[tokio::test]
async fn test_blank_identity_is_rejected() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/whoami")
                .header("X-User-ID", "   ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_error_body_shape() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/missing")
                .header("X-User-ID", "u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = to_bytes(response.into_body(), 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "no such thing");
}
