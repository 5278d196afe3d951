use chrono::Utc;
use mockito::Matcher;
use serde_json::json;
use uuid::Uuid;

use chatdesk::channels::{ChannelAdapter, ChannelError, ChannelType, WhatsAppCloudAdapter};
use chatdesk::whatsapp::Whatsapp;

fn connection(phone_number_id: Option<&str>) -> Whatsapp {
    let now = Utc::now();
    Whatsapp {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        name: "Support".into(),
        channel: "waba".into(),
        status: "CONNECTED".into(),
        phone_number: Some("5511900000000".into()),
        phone_number_id: phone_number_id.map(str::to_string),
        access_token: Some("token-123".into()),
        verify_token: None,
        is_default: true,
        is_active: true,
        farewell_message: None,
        chat_flow_id: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_send_text_returns_wamid() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/1234/messages")
        .match_header("authorization", "Bearer token-123")
        .match_body(Matcher::PartialJson(json!({
            "messaging_product": "whatsapp",
            "to": "5511988887777",
            "type": "text",
            "text": {"body": "Hello"}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"messages":[{"id":"wamid.ABC"}]}"#)
        .create_async()
        .await;

    let adapter = WhatsAppCloudAdapter::new(server.url());
    assert_eq!(adapter.kind(), ChannelType::Waba);
    let sent = adapter
        .send_text(&connection(Some("1234")), "5511988887777", "Hello")
        .await
        .unwrap();

    assert_eq!(sent.external_id.as_deref(), Some("wamid.ABC"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_api_error_is_reported_with_status() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/1234/messages")
        .with_status(401)
        .with_body(r#"{"error":{"message":"Invalid OAuth access token"}}"#)
        .create_async()
        .await;

    let adapter = WhatsAppCloudAdapter::new(server.url());
    let err = adapter
        .send_text(&connection(Some("1234")), "5511988887777", "Hello")
        .await
        .unwrap_err();

    match err {
        ChannelError::Api { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("Invalid OAuth"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unconfigured_connection_never_calls_api() {
    let adapter = WhatsAppCloudAdapter::new("http://127.0.0.1:1");
    let err = adapter
        .send_text(&connection(None), "5511988887777", "Hello")
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::NotConfigured(name) if name == "Support"));
}
