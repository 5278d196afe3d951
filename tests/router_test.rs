use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use chatdesk::auth::create_access_token;
use chatdesk::core::shared::test_utils::{create_test_state, test_config};
use chatdesk::main_module::build_router;
use chatdesk::users::User;

fn bearer_for(profile: &str) -> String {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        name: "Agent".into(),
        email: "agent@example.com".into(),
        password_hash: String::new(),
        profile: profile.into(),
        token_version: 0,
        is_online: true,
        last_login: None,
        created_at: now,
        updated_at: now,
    };
    let token = create_access_token(&test_config().auth, &user).unwrap();
    format!("Bearer {token}")
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_simple_health_needs_no_database() {
    let app = build_router(Arc::new(create_test_state()));
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    for uri in ["/api/tickets", "/api/contacts", "/api/campaigns", "/api/dashboard/tickets-status"] {
        let app = build_router(Arc::new(create_test_state()));
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body_json(response).await["error"], "ERR_SESSION_EXPIRED");
    }
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let app = build_router(Arc::new(create_test_state()));
    let response = app
        .oneshot(
            Request::get("/api/tickets")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_non_admin_cannot_list_api_configs() {
    let app = build_router(Arc::new(create_test_state()));
    let response = app
        .oneshot(
            Request::get("/api/api-config")
                .header(header::AUTHORIZATION, bearer_for("user"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "ERR_NO_PERMISSION");
}

#[tokio::test]
async fn test_dashboard_rejects_inverted_range() {
    let app = build_router(Arc::new(create_test_state()));
    let response = app
        .oneshot(
            Request::get("/api/dashboard/tickets-per-day?start=2024-03-10&end=2024-03-01")
                .header(header::AUTHORIZATION, bearer_for("admin"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "ERR_INVALID_DATE_RANGE");
}

#[tokio::test]
async fn test_external_api_requires_bearer() {
    let app = build_router(Arc::new(create_test_state()));
    let response = app
        .oneshot(
            Request::post(format!("/v1/api/external/{}", Uuid::new_v4()))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"number":"5511999990000","body":"hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ticket_page_overflow_is_rejected() {
    let app = build_router(Arc::new(create_test_state()));
    let response = app
        .oneshot(
            Request::get(format!("/api/tickets?page={}", i64::MAX))
                .header(header::AUTHORIZATION, bearer_for("user"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "ERR_INVALID_PAGE");
}

#[tokio::test]
async fn test_message_page_overflow_is_rejected() {
    let app = build_router(Arc::new(create_test_state()));
    let response = app
        .oneshot(
            Request::get(format!("/api/messages/{}?page={}", Uuid::new_v4(), i64::MAX))
                .header(header::AUTHORIZATION, bearer_for("user"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "ERR_INVALID_PAGE");
}

#[tokio::test]
async fn test_auto_close_setting_rejects_huge_window() {
    let app = build_router(Arc::new(create_test_state()));
    let response = app
        .oneshot(
            Request::put("/api/settings/autoCloseTicketsDays")
                .header(header::AUTHORIZATION, bearer_for("admin"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"value":"9223372036854775807"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "ERR_INVALID_SETTING_VALUE");
}

#[tokio::test]
async fn test_flow_with_unbounded_timeout_is_rejected() {
    let app = build_router(Arc::new(create_test_state()));
    let flow = serde_json::json!({
        "name": "triage",
        "flow": {
            "nodes": [
                { "type": "start", "id": "start", "next": "menu" },
                { "type": "node", "id": "menu", "interactions": ["1 - Sales"] }
            ],
            "config": { "no_response": { "minutes": i64::MAX, "destiny": { "type": "close" } } }
        }
    });
    let response = app
        .oneshot(
            Request::post("/api/chat-flow")
                .header(header::AUTHORIZATION, bearer_for("admin"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(flow.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await["error"].to_string();
    assert!(error.contains("no_response.minutes"), "{error}");
}
