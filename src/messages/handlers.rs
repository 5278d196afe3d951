use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{send_on_ticket, Message, MessageStatus, Outgoing, SendType};
use crate::auth::AuthUser;
use crate::contacts::find_contact;
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::messages;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::Page;
use crate::realtime::{emit, EventKind, SocketEvent};
use crate::settings::load_settings;
use crate::tickets::service::{find_ticket, update_ticket, visible_ticket};
use crate::tickets::{Ticket, TicketChange, TicketStatus};
use crate::whatsapp::find_connection;

const PAGE_SIZE: i64 = 20;

#[derive(Debug, Default, Deserialize)]
pub struct MessageListQuery {
    pub page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<Message>,
    pub ticket: Ticket,
    pub count: i64,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
    pub quoted_msg_id: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(ticket_id): Path<Uuid>,
    Query(query): Query<MessageListQuery>,
) -> AppResult<Json<MessageListResponse>> {
    let page = Page::new(query.page, PAGE_SIZE)?;
    let (rows, ticket, count) = state
        .run_db(move |conn| {
            let settings = load_settings(conn, auth.tenant_id)?;
            let ticket = visible_ticket(conn, &auth, &settings, ticket_id)?;

            let count: i64 = messages::table
                .filter(messages::ticket_id.eq(ticket.id))
                .count()
                .get_result(conn)?;
            let rows = messages::table
                .filter(messages::ticket_id.eq(ticket.id))
                .order(messages::created_at.desc())
                .limit(page.size)
                .offset(page.offset)
                .select(Message::as_select())
                .load(conn)?;
            Ok((rows, ticket, count))
        })
        .await?;

    Ok(Json(MessageListResponse {
        messages: rows,
        ticket,
        count,
        has_more: page.has_more(count),
    }))
}

fn store_scheduled(
    conn: &mut PgConnection,
    ticket: &Ticket,
    user_id: Uuid,
    req: &SendMessageRequest,
    scheduled_at: DateTime<Utc>,
) -> QueryResult<Message> {
    let now = Utc::now();
    let message = Message {
        id: Uuid::new_v4(),
        tenant_id: ticket.tenant_id,
        ticket_id: ticket.id,
        contact_id: Some(ticket.contact_id),
        user_id: Some(user_id),
        body: req.body.clone(),
        from_me: true,
        read: true,
        media_type: "chat".to_string(),
        media_url: None,
        ack: 0,
        external_id: None,
        quoted_msg_id: req.quoted_msg_id,
        is_deleted: false,
        send_type: SendType::Schedule.as_str().to_string(),
        status: MessageStatus::Pending.as_str().to_string(),
        scheduled_at: Some(scheduled_at),
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(messages::table)
        .values(&message)
        .execute(conn)?;
    Ok(message)
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<Message>> {
    if req.body.trim().is_empty() {
        return Err(AppError::bad_request("ERR_EMPTY_MESSAGE"));
    }
    let tenant_id = auth.tenant_id;
    let actor = auth.user_id;
    let mut ticket = state
        .run_db(move |conn| {
            let settings = load_settings(conn, auth.tenant_id)?;
            visible_ticket(conn, &auth, &settings, ticket_id)
        })
        .await?;

    match ticket.status() {
        TicketStatus::Closed => return Err(AppError::bad_request("ERR_TICKET_CLOSED")),
        TicketStatus::Pending => {
            let change = TicketChange {
                status: Some(TicketStatus::Open),
                ..Default::default()
            };
            ticket = update_ticket(&state, ticket, change, Some(actor), None).await?;
        }
        TicketStatus::Open => {}
    }

    if let Some(scheduled_at) = req.scheduled_at.filter(|at| *at > Utc::now()) {
        let message = state
            .run_db(move |conn| Ok(store_scheduled(conn, &ticket, actor, &req, scheduled_at)?))
            .await?;
        emit(
            &state,
            SocketEvent::new(tenant_id, EventKind::ChatCreate, &message).for_user(actor),
        );
        return Ok(Json(message));
    }

    let (contact_id, whatsapp_id) = (ticket.contact_id, ticket.whatsapp_id);
    let (contact, connection) = state
        .run_db(move |conn| {
            Ok((
                find_contact(conn, tenant_id, contact_id)?,
                find_connection(conn, tenant_id, whatsapp_id)?,
            ))
        })
        .await?;
    let out = Outgoing {
        user_id: Some(actor),
        quoted_msg_id: req.quoted_msg_id,
        ..Outgoing::new(req.body, SendType::Chat)
    };
    let (message, _) = send_on_ticket(&state, &ticket, &contact, &connection, out).await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Message>> {
    let tenant_id = auth.tenant_id;
    let message = state
        .run_db(move |conn| {
            let message: Message = messages::table
                .filter(messages::id.eq(id))
                .filter(messages::tenant_id.eq(tenant_id))
                .select(Message::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found("ERR_NO_MESSAGE_FOUND"))?;
            // only what the agent side sent can be withdrawn
            if !message.from_me {
                return Err(AppError::forbidden("ERR_CANNOT_DELETE_MESSAGE"));
            }
            find_ticket(conn, tenant_id, message.ticket_id)?;

            Ok(diesel::update(messages::table.find(id))
                .set((
                    messages::is_deleted.eq(true),
                    messages::updated_at.eq(Utc::now()),
                ))
                .returning(Message::as_returning())
                .get_result(conn)?)
        })
        .await?;
    emit(
        &state,
        SocketEvent::new(tenant_id, EventKind::ChatUpdate, &message),
    );
    Ok(Json(message))
}

pub fn configure_messages_routes() -> Router<Arc<AppState>> {
    // GET/POST take a ticket id, DELETE a message id
    Router::new().route(
        "/api/messages/{id}",
        get(list_messages).post(send_message).delete(delete_message),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_request_schedule_is_optional() {
        let req: SendMessageRequest = serde_json::from_str(r#"{"body":"hi"}"#).unwrap();
        assert!(req.scheduled_at.is_none());
        let req: SendMessageRequest =
            serde_json::from_str(r#"{"body":"hi","scheduled_at":"2030-01-01T10:00:00Z"}"#)
                .unwrap();
        assert!(req.scheduled_at.is_some());
    }
}
