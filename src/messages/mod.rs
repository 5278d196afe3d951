//! Messages exchanged on tickets, outbound delivery and delivery acks.

mod handlers;
pub mod inbound;
pub mod scheduled;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contacts::Contact;
use crate::core::error::AppResult;
use crate::core::shared::schema::{api_messages, campaign_contacts, messages, tickets};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::truncate_chars;
use crate::realtime::{emit, EventKind, SocketEvent};
use crate::tickets::Ticket;
use crate::whatsapp::Whatsapp;

pub use handlers::configure_messages_routes;

/// Preview length kept on the ticket.
const LAST_MESSAGE_PREVIEW: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendType {
    Chat,
    Bot,
    Campaign,
    Farewell,
    Schedule,
    Api,
    Hours,
}

impl SendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Bot => "bot",
            Self::Campaign => "campaign",
            Self::Farewell => "farewell",
            Self::Schedule => "schedule",
            Self::Api => "api",
            Self::Hours => "hours",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sended,
    Received,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sended => "sended",
            Self::Received => "received",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Message {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub ticket_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub body: String,
    pub from_me: bool,
    pub read: bool,
    pub media_type: String,
    pub media_url: Option<String>,
    pub ack: i32,
    pub external_id: Option<String>,
    pub quoted_msg_id: Option<Uuid>,
    pub is_deleted: bool,
    pub send_type: String,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Maps a WhatsApp Cloud delivery status to the numeric ack scale
/// (0 pending, 1 sent, 2 delivered, 3 read, 4 played, -1 failed).
pub fn ack_from_status(status: &str) -> Option<i32> {
    match status {
        "sent" => Some(1),
        "delivered" => Some(2),
        "read" => Some(3),
        "played" => Some(4),
        "failed" => Some(-1),
        _ => None,
    }
}

/// What is being sent on a ticket.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub body: String,
    pub send_type: SendType,
    pub user_id: Option<Uuid>,
    pub quoted_msg_id: Option<Uuid>,
}

impl Outgoing {
    pub fn new(body: impl Into<String>, send_type: SendType) -> Self {
        Self {
            body: body.into(),
            send_type,
            user_id: None,
            quoted_msg_id: None,
        }
    }
}

fn touch_ticket(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    body: &str,
    answered: bool,
    now: DateTime<Utc>,
) -> QueryResult<Ticket> {
    let preview = truncate_chars(body, LAST_MESSAGE_PREVIEW);
    let query = diesel::update(tickets::table.find(ticket_id));
    if answered {
        query
            .set((
                tickets::last_message.eq(Some(preview)),
                tickets::last_message_at.eq(Some(now)),
                tickets::answered.eq(true),
                tickets::updated_at.eq(now),
            ))
            .returning(Ticket::as_returning())
            .get_result(conn)
    } else {
        query
            .set((
                tickets::last_message.eq(Some(preview)),
                tickets::last_message_at.eq(Some(now)),
                tickets::updated_at.eq(now),
            ))
            .returning(Ticket::as_returning())
            .get_result(conn)
    }
}

/// Delivers `out` to the ticket's contact through the connection and stores it.
/// Returns the stored message and the ticket with its new preview.
pub async fn send_on_ticket(
    state: &AppState,
    ticket: &Ticket,
    contact: &Contact,
    connection: &Whatsapp,
    out: Outgoing,
) -> AppResult<(Message, Ticket)> {
    let sent = state
        .channels
        .send_text(connection, &contact.number, &out.body)
        .await?;

    let now = Utc::now();
    let message = Message {
        id: Uuid::new_v4(),
        tenant_id: ticket.tenant_id,
        ticket_id: ticket.id,
        contact_id: Some(contact.id),
        user_id: out.user_id,
        body: out.body,
        from_me: true,
        read: true,
        media_type: "chat".to_string(),
        media_url: None,
        ack: 1,
        external_id: sent.external_id,
        quoted_msg_id: out.quoted_msg_id,
        is_deleted: false,
        send_type: out.send_type.as_str().to_string(),
        status: MessageStatus::Sended.as_str().to_string(),
        scheduled_at: None,
        created_at: now,
        updated_at: now,
    };
    let answered = matches!(out.send_type, SendType::Chat | SendType::Schedule);
    let (message, ticket) = state
        .run_db(move |conn| {
            diesel::insert_into(messages::table)
                .values(&message)
                .execute(conn)?;
            let ticket = touch_ticket(conn, message.ticket_id, &message.body, answered, now)?;
            Ok((message, ticket))
        })
        .await?;

    emit(
        state,
        SocketEvent::new(ticket.tenant_id, EventKind::ChatCreate, &message),
    );
    emit(
        state,
        SocketEvent::new(ticket.tenant_id, EventKind::TicketUpdate, &ticket),
    );
    Ok((message, ticket))
}

/// Same as [`send_on_ticket`] for system messages whose failure must not abort the caller.
pub async fn send_best_effort(
    state: &AppState,
    ticket: &Ticket,
    contact: &Contact,
    connection: &Whatsapp,
    out: Outgoing,
) -> Option<(Message, Ticket)> {
    let kind = out.send_type;
    match send_on_ticket(state, ticket, contact, connection, out).await {
        Ok(sent) => Some(sent),
        Err(e) => {
            warn!("Failed to send {} message on ticket {}: {e}", kind.as_str(), ticket.id);
            None
        }
    }
}

/// Content of a message received from a contact.
#[derive(Debug, Clone, Default)]
pub struct InboundContent {
    pub body: String,
    pub media_type: String,
    pub media_url: Option<String>,
    pub external_id: Option<String>,
    pub from_me: bool,
}

pub fn record_inbound(
    conn: &mut PgConnection,
    ticket: &Ticket,
    sender: &Contact,
    content: &InboundContent,
) -> QueryResult<(Message, Ticket)> {
    let now = Utc::now();
    let message = Message {
        id: Uuid::new_v4(),
        tenant_id: ticket.tenant_id,
        ticket_id: ticket.id,
        contact_id: Some(sender.id),
        user_id: None,
        body: content.body.clone(),
        from_me: content.from_me,
        read: content.from_me,
        media_type: if content.media_type.is_empty() {
            "chat".to_string()
        } else {
            content.media_type.clone()
        },
        media_url: content.media_url.clone(),
        ack: 0,
        external_id: content.external_id.clone(),
        quoted_msg_id: None,
        is_deleted: false,
        send_type: SendType::Chat.as_str().to_string(),
        status: MessageStatus::Received.as_str().to_string(),
        scheduled_at: None,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(messages::table)
        .values(&message)
        .execute(conn)?;
    let ticket = touch_ticket(conn, ticket.id, &message.body, content.from_me, now)?;
    Ok((message, ticket))
}

/// Applies a delivery status to every record carrying `external_id`.
/// Returns the updated ticket message, if any, for the caller to broadcast.
pub fn apply_ack(
    conn: &mut PgConnection,
    external_id: &str,
    ack: i32,
) -> QueryResult<Option<Message>> {
    let now = Utc::now();
    // acks only move forward, except failures which always apply
    let mut target = messages::table
        .filter(messages::external_id.eq(external_id))
        .into_boxed();
    if ack >= 0 {
        target = target.filter(messages::ack.lt(ack));
    }
    let ids: Vec<Uuid> = target.select(messages::id).load(conn)?;
    let message: Option<Message> = match ids.first() {
        Some(id) => Some(
            diesel::update(messages::table.find(*id))
                .set((messages::ack.eq(ack), messages::updated_at.eq(now)))
                .returning(Message::as_returning())
                .get_result(conn)?,
        ),
        None => None,
    };

    let campaign_rows = diesel::update(
        campaign_contacts::table.filter(campaign_contacts::external_id.eq(external_id)),
    )
    .set(campaign_contacts::ack.eq(ack))
    .execute(conn)?;

    diesel::update(api_messages::table.filter(api_messages::external_id.eq(external_id)))
        .set(api_messages::ack.eq(ack))
        .execute(conn)?;

    debug!("Ack {ack} for {external_id} (campaign rows: {campaign_rows})");
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_mapping() {
        assert_eq!(ack_from_status("sent"), Some(1));
        assert_eq!(ack_from_status("read"), Some(3));
        assert_eq!(ack_from_status("failed"), Some(-1));
        assert_eq!(ack_from_status("deleted"), None);
    }

    #[test]
    fn test_send_type_wire_names() {
        assert_eq!(SendType::Farewell.as_str(), "farewell");
        assert_eq!(
            serde_json::to_value(SendType::Hours).unwrap(),
            serde_json::json!("hours")
        );
        assert_eq!(MessageStatus::Sended.as_str(), "sended");
    }
}
