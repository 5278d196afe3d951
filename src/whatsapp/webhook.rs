//! WhatsApp Cloud API webhook: verification handshake, inbound messages and
//! delivery statuses. Each connection has its own callback URL.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use diesel::prelude::*;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::Whatsapp;
use crate::core::shared::schema::whatsapps;
use crate::core::shared::state::AppState;
use crate::messages::inbound::{handle_inbound, InboundMessage};
use crate::messages::{ack_from_status, apply_ack, InboundContent};
use crate::realtime::{emit, EventKind, SocketEvent};

#[derive(Debug, Deserialize)]
pub struct WebhookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppWebhook {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WhatsAppEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppEntry {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<WhatsAppChange>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppChange {
    pub field: String,
    pub value: WhatsAppValue,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppValue {
    pub messaging_product: String,
    #[serde(default)]
    pub metadata: WhatsAppMetadata,
    #[serde(default)]
    pub contacts: Vec<WhatsAppContact>,
    #[serde(default)]
    pub messages: Vec<WhatsAppMessage>,
    #[serde(default)]
    pub statuses: Vec<WhatsAppStatus>,
    /// Messages the business sent from another client on the same number,
    /// delivered under the `smb_message_echoes` field.
    #[serde(default)]
    pub message_echoes: Vec<WhatsAppMessage>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WhatsAppMetadata {
    pub display_phone_number: Option<String>,
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppContact {
    pub wa_id: String,
    pub profile: WhatsAppProfile,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppProfile {
    pub name: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WhatsAppMessage {
    pub id: String,
    pub from: String,
    /// Recipient, present on echoes only
    #[serde(default)]
    pub to: Option<String>,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<WhatsAppText>,
    #[serde(default)]
    pub image: Option<WhatsAppMedia>,
    #[serde(default)]
    pub audio: Option<WhatsAppMedia>,
    #[serde(default)]
    pub video: Option<WhatsAppMedia>,
    #[serde(default)]
    pub document: Option<WhatsAppMedia>,
    #[serde(default)]
    pub location: Option<WhatsAppLocation>,
    #[serde(default)]
    pub interactive: Option<WhatsAppInteractive>,
    #[serde(default)]
    pub button: Option<WhatsAppButton>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppText {
    pub body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppMedia {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppInteractive {
    #[serde(rename = "type")]
    pub interactive_type: String,
    #[serde(default)]
    pub button_reply: Option<WhatsAppButtonReply>,
    #[serde(default)]
    pub list_reply: Option<WhatsAppListReply>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppButtonReply {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppListReply {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppButton {
    pub payload: String,
    pub text: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppStatus {
    pub id: String,
    pub status: String,
    pub timestamp: String,
    pub recipient_id: String,
}

pub fn configure_webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/webhook/whatsapp/{id}",
        get(verify_webhook).post(handle_webhook),
    )
}

async fn load_connection(state: &AppState, id: Uuid) -> Option<Whatsapp> {
    state
        .run_db(move |conn| {
            Ok(whatsapps::table
                .find(id)
                .select(Whatsapp::as_select())
                .first(conn)
                .optional()?)
        })
        .await
        .unwrap_or_else(|e| {
            error!("Webhook connection lookup failed: {e}");
            None
        })
}

pub async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<WebhookVerifyQuery>,
) -> impl IntoResponse {
    info!("Webhook verification request for connection {id}");

    let mode = params.mode.unwrap_or_default();
    let token = params.verify_token.unwrap_or_default();
    let challenge = params.challenge.unwrap_or_default();

    if mode != "subscribe" {
        warn!("Invalid webhook mode: {mode}");
        return (StatusCode::FORBIDDEN, "Invalid mode".to_string());
    }

    let expected = load_connection(&state, id).await.and_then(|c| c.verify_token);
    match expected {
        Some(expected) if !expected.is_empty() && expected == token => {
            info!("Webhook verification successful for connection {id}");
            (StatusCode::OK, challenge)
        }
        _ => {
            warn!("Invalid verify token for connection {id}");
            (StatusCode::FORBIDDEN, "Invalid verify token".to_string())
        }
    }
}

/// Readable body and media kind of a webhook message; an empty body means
/// there is nothing worth recording.
pub fn extract_message_content(message: &WhatsAppMessage) -> (String, &'static str) {
    let media = |m: &Option<WhatsAppMedia>, kind: &'static str| {
        let caption = m
            .as_ref()
            .and_then(|m| m.caption.clone())
            .filter(|c| !c.trim().is_empty());
        (caption.unwrap_or_else(|| format!("[{kind}]")), kind)
    };

    match message.message_type.as_str() {
        "text" => (
            message
                .text
                .as_ref()
                .map(|t| t.body.clone())
                .unwrap_or_default(),
            "chat",
        ),
        "interactive" => {
            let title = message.interactive.as_ref().and_then(|i| {
                match i.interactive_type.as_str() {
                    "button_reply" => i.button_reply.as_ref().map(|b| b.title.clone()),
                    "list_reply" => i.list_reply.as_ref().map(|l| l.title.clone()),
                    _ => None,
                }
            });
            (title.unwrap_or_default(), "chat")
        }
        "button" => (
            message
                .button
                .as_ref()
                .map(|b| b.text.clone())
                .unwrap_or_default(),
            "chat",
        ),
        "image" => media(&message.image, "image"),
        "audio" => media(&message.audio, "audio"),
        "video" => media(&message.video, "video"),
        "document" => media(&message.document, "document"),
        "location" => match &message.location {
            Some(loc) => (
                format!(
                    "{}, {}{}",
                    loc.latitude,
                    loc.longitude,
                    loc.name
                        .as_deref()
                        .map(|n| format!(" ({n})"))
                        .unwrap_or_default()
                ),
                "location",
            ),
            None => (String::new(), "location"),
        },
        _ => (String::new(), "chat"),
    }
}

fn to_inbound(message: &WhatsAppMessage, contacts: &[WhatsAppContact]) -> Option<InboundMessage> {
    let (body, media_type) = extract_message_content(message);
    if body.trim().is_empty() {
        return None;
    }
    let name = contacts
        .iter()
        .find(|c| c.wa_id == message.from)
        .or_else(|| contacts.first())
        .map(|c| c.profile.name.clone());

    Some(InboundMessage {
        number: message.from.clone(),
        name,
        group: None,
        content: InboundContent {
            body,
            media_type: media_type.to_string(),
            media_url: None,
            external_id: Some(message.id.clone()),
            from_me: false,
        },
        unread: 1,
    })
}

/// A message the business itself sent, attached to the recipient's conversation.
fn echo_to_inbound(message: &WhatsAppMessage) -> Option<InboundMessage> {
    let recipient = message.to.as_deref().filter(|to| !to.trim().is_empty())?;
    let (body, media_type) = extract_message_content(message);
    if body.trim().is_empty() {
        return None;
    }
    Some(InboundMessage {
        number: recipient.to_string(),
        name: None,
        group: None,
        content: InboundContent {
            body,
            media_type: media_type.to_string(),
            media_url: None,
            external_id: Some(message.id.clone()),
            from_me: true,
        },
        unread: 0,
    })
}

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<WhatsAppWebhook>,
) -> impl IntoResponse {
    debug!("Webhook {} received for connection {id}", payload.object);

    if payload.object != "whatsapp_business_account" {
        return StatusCode::OK;
    }
    let Some(connection) = load_connection(&state, id).await else {
        warn!("Webhook for unknown connection {id}");
        return StatusCode::NOT_FOUND;
    };
    if !connection.is_active {
        debug!("Connection {id} is inactive, dropping webhook");
        return StatusCode::OK;
    }

    for entry in payload.entry {
        for change in entry.changes {
            let value = change.value;
            let inbound: Vec<(&str, Option<InboundMessage>)> = match change.field.as_str() {
                "messages" => value
                    .messages
                    .iter()
                    .map(|m| (m.id.as_str(), to_inbound(m, &value.contacts)))
                    .collect(),
                "smb_message_echoes" => value
                    .message_echoes
                    .iter()
                    .map(|m| (m.id.as_str(), echo_to_inbound(m)))
                    .collect(),
                other => {
                    debug!("Ignoring webhook field {other}");
                    continue;
                }
            };

            for (message_id, message) in inbound {
                let Some(message) = message else {
                    debug!("Skipping empty message {message_id}");
                    continue;
                };
                if let Err(e) = handle_inbound(&state, &connection, message).await {
                    error!("Failed to process message {message_id}: {e}");
                }
            }

            for status in &value.statuses {
                let Some(ack) = ack_from_status(&status.status) else {
                    continue;
                };
                let external_id = status.id.clone();
                let result = state
                    .run_db(move |conn| Ok(apply_ack(conn, &external_id, ack)?))
                    .await;
                match result {
                    Ok(Some(message)) => emit(
                        &state,
                        SocketEvent::new(message.tenant_id, EventKind::ChatAck, &message),
                    ),
                    Ok(None) => {}
                    Err(e) => {
                        error!("Failed to apply status {} to {}: {e}", status.status, status.id)
                    }
                }
            }
        }
    }

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(kind: &str) -> WhatsAppMessage {
        WhatsAppMessage {
            id: "wamid.1".to_string(),
            from: "5511999990000".to_string(),
            timestamp: "1700000000".to_string(),
            message_type: kind.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_extract_text_message() {
        let mut msg = message("text");
        msg.text = Some(WhatsAppText {
            body: "Hello".to_string(),
        });
        assert_eq!(extract_message_content(&msg), ("Hello".to_string(), "chat"));
    }

    #[test]
    fn test_extract_list_reply() {
        let mut msg = message("interactive");
        msg.interactive = Some(WhatsAppInteractive {
            interactive_type: "list_reply".to_string(),
            button_reply: None,
            list_reply: Some(WhatsAppListReply {
                id: "2".to_string(),
                title: "Billing".to_string(),
            }),
        });
        assert_eq!(extract_message_content(&msg).0, "Billing");
    }

    #[test]
    fn test_media_caption_or_placeholder() {
        let mut msg = message("image");
        msg.image = Some(WhatsAppMedia {
            id: "media1".to_string(),
            mime_type: Some("image/jpeg".to_string()),
            caption: Some("receipt".to_string()),
        });
        assert_eq!(extract_message_content(&msg), ("receipt".to_string(), "image"));

        let mut msg = message("audio");
        msg.audio = Some(WhatsAppMedia {
            id: "media2".to_string(),
            mime_type: None,
            caption: None,
        });
        assert_eq!(extract_message_content(&msg), ("[audio]".to_string(), "audio"));
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        assert!(to_inbound(&message("reaction"), &[]).is_none());
    }

    #[test]
    fn test_inbound_takes_profile_name() {
        let mut msg = message("text");
        msg.text = Some(WhatsAppText {
            body: "oi".to_string(),
        });
        let contacts = vec![WhatsAppContact {
            wa_id: "5511999990000".to_string(),
            profile: WhatsAppProfile {
                name: "Maria".to_string(),
            },
        }];
        let inbound = to_inbound(&msg, &contacts).unwrap();
        assert_eq!(inbound.name.as_deref(), Some("Maria"));
        assert_eq!(inbound.content.external_id.as_deref(), Some("wamid.1"));
        assert!(!inbound.content.from_me);
    }

    #[test]
    fn test_payload_with_statuses_deserializes() {
        let raw = r#"{
            "object": "whatsapp_business_account",
            "entry": [{"id": "1", "changes": [{"field": "messages", "value": {
                "messaging_product": "whatsapp",
                "statuses": [{"id": "wamid.9", "status": "read", "timestamp": "1", "recipient_id": "55"}]
            }}]}]
        }"#;
        let payload: WhatsAppWebhook = serde_json::from_str(raw).unwrap();
        let status = &payload.entry[0].changes[0].value.statuses[0];
        assert_eq!(ack_from_status(&status.status), Some(3));
    }

    #[test]
    fn test_business_echo_becomes_own_message() {
        let raw = r#"{
            "object": "whatsapp_business_account",
            "entry": [{"id": "1", "changes": [{"field": "smb_message_echoes", "value": {
                "messaging_product": "whatsapp",
                "message_echoes": [{"id": "wamid.7", "from": "5511300000000",
                    "to": "5511999990000", "timestamp": "1", "type": "text",
                    "text": {"body": "Thanks for reaching out"}}]
            }}]}]
        }"#;
        let payload: WhatsAppWebhook = serde_json::from_str(raw).unwrap();
        let echo = &payload.entry[0].changes[0].value.message_echoes[0];
        let inbound = echo_to_inbound(echo).unwrap();
        assert_eq!(inbound.number, "5511999990000");
        assert!(inbound.content.from_me);
        assert_eq!(inbound.unread, 0);
        assert_eq!(inbound.content.external_id.as_deref(), Some("wamid.7"));
    }

    #[test]
    fn test_echo_without_recipient_is_skipped() {
        let mut msg = message("text");
        msg.text = Some(WhatsAppText {
            body: "hi".to_string(),
        });
        assert!(echo_to_inbound(&msg).is_none());
        msg.to = Some("5511999990000".to_string());
        assert!(echo_to_inbound(&msg).is_some());
    }
}
