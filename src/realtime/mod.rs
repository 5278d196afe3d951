//! Live updates over WebSocket.
//!
//! Services publish `SocketEvent`s on the broadcast channel held by `AppState`.
//! Each socket subscribes once and only forwards events of its own tenant; events
//! addressed to a single user reach only that user.

use crate::auth::{decode_access_token, Claims};
use crate::core::shared::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "ticket:update")]
    TicketUpdate,
    #[serde(rename = "ticket:delete")]
    TicketDelete,
    #[serde(rename = "chat:create")]
    ChatCreate,
    #[serde(rename = "chat:update")]
    ChatUpdate,
    #[serde(rename = "chat:ack")]
    ChatAck,
    #[serde(rename = "contact:update")]
    ContactUpdate,
    #[serde(rename = "campaign:update")]
    CampaignUpdate,
    #[serde(rename = "whatsapp:update")]
    WhatsappUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketEvent {
    pub tenant_id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

impl SocketEvent {
    pub fn new(tenant_id: Uuid, kind: EventKind, payload: impl Serialize) -> Self {
        Self {
            tenant_id,
            kind,
            payload: serde_json::to_value(payload).unwrap_or_default(),
            user_id: None,
        }
    }

    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

impl Subscription {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            tenant_id: claims.tenant_id,
            user_id: claims.sub,
        }
    }

    pub fn accepts(&self, event: &SocketEvent) -> bool {
        event.tenant_id == self.tenant_id
            && event.user_id.map_or(true, |target| target == self.user_id)
    }
}

/// Publishes an event; having no connected sockets is not an error.
pub fn emit(state: &AppState, event: SocketEvent) {
    if let Err(e) = state.events.send(event) {
        debug!("No sockets listening for {:?}", e.0.kind);
    }
}

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

pub fn configure_realtime_routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(websocket_handler))
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SocketQuery>,
) -> impl IntoResponse {
    let Some(token) = params.token else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "ERR_SESSION_EXPIRED" })),
        )
            .into_response();
    };

    let claims = match decode_access_token(&state.config.auth, &token) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    let subscription = Subscription::from_claims(&claims);
    info!(
        "WebSocket connection request from user {} (tenant {})",
        subscription.user_id, subscription.tenant_id
    );

    ws.on_upgrade(move |socket| handle_socket(socket, state, subscription))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();

    let welcome = serde_json::json!({
        "type": "connected",
        "user_id": subscription.user_id,
        "timestamp": Utc::now().to_rfc3339()
    });
    if sender
        .send(Message::Text(welcome.to_string().into()))
        .await
        .is_err()
    {
        error!("Failed to send welcome message to user {}", subscription.user_id);
        return;
    }

    let mut events = state.events.subscribe();
    let (pong_tx, mut pong_rx) = tokio::sync::mpsc::channel::<String>(8);

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        if !subscription.accepts(&event) {
                            continue;
                        }
                        let Ok(json) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Socket of user {} lagged behind by {} events", subscription.user_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(reply) = pong_rx.recv() => {
                    if sender.send(Message::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let parsed: serde_json::Value = match serde_json::from_str(text.as_str()) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if parsed.get("type").and_then(|v| v.as_str()) == Some("ping") {
                        let reply = serde_json::json!({
                            "type": "pong",
                            "timestamp": Utc::now().to_rfc3339()
                        });
                        if pong_tx.send(reply.to_string()).await.is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket disconnected: {}", subscription.user_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(tenant: Uuid, user: Uuid) -> Subscription {
        Subscription {
            tenant_id: tenant,
            user_id: user,
        }
    }

    #[test]
    fn test_event_kind_wire_names() {
        let ev = SocketEvent::new(Uuid::nil(), EventKind::TicketUpdate, serde_json::json!({}));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "ticket:update");
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn test_subscription_is_tenant_scoped() {
        let tenant = Uuid::new_v4();
        let other = Uuid::new_v4();
        let user = Uuid::new_v4();
        let ev = SocketEvent::new(tenant, EventKind::ChatCreate, "x");
        assert!(sub(tenant, user).accepts(&ev));
        assert!(!sub(other, user).accepts(&ev));
    }

    #[test]
    fn test_user_targeted_event() {
        let tenant = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let ev = SocketEvent::new(tenant, EventKind::TicketUpdate, "x").for_user(alice);
        assert!(sub(tenant, alice).accepts(&ev));
        assert!(!sub(tenant, bob).accepts(&ev));
    }

    #[tokio::test]
    async fn test_emit_without_listeners_is_silent() {
        let state = crate::core::shared::test_utils::create_test_state();
        emit(&state, SocketEvent::new(Uuid::nil(), EventKind::ChatAck, "x"));
        let mut rx = state.events.subscribe();
        emit(&state, SocketEvent::new(Uuid::nil(), EventKind::ChatAck, "y"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.payload, serde_json::json!("y"));
    }
}
