//! Delivery of messages agents scheduled for later.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{info, warn};

use super::{touch_ticket, Message, MessageStatus, SendType};
use crate::contacts::find_contact;
use crate::core::error::AppResult;
use crate::core::shared::schema::messages;
use crate::core::shared::state::AppState;
use crate::realtime::{emit, EventKind, SocketEvent};
use crate::tickets::service::find_ticket;
use crate::whatsapp::find_connection;

/// Upper bound of messages sent per run.
const BATCH_SIZE: i64 = 100;

pub fn due_messages(conn: &mut PgConnection, now: DateTime<Utc>) -> QueryResult<Vec<Message>> {
    messages::table
        .filter(messages::send_type.eq(SendType::Schedule.as_str()))
        .filter(messages::status.eq(MessageStatus::Pending.as_str()))
        .filter(messages::is_deleted.eq(false))
        .filter(messages::scheduled_at.le(now))
        .order(messages::scheduled_at.asc())
        .limit(BATCH_SIZE)
        .select(Message::as_select())
        .load(conn)
}

async fn deliver(state: &AppState, message: &Message) -> AppResult<Message> {
    let (tenant_id, ticket_id) = (message.tenant_id, message.ticket_id);
    let (ticket, contact, connection) = state
        .run_db(move |conn| {
            let ticket = find_ticket(conn, tenant_id, ticket_id)?;
            let contact = find_contact(conn, tenant_id, ticket.contact_id)?;
            let connection = find_connection(conn, tenant_id, ticket.whatsapp_id)?;
            Ok((ticket, contact, connection))
        })
        .await?;

    let sent = state
        .channels
        .send_text(&connection, &contact.number, &message.body)
        .await?;
    let message_id = message.id;
    let (delivered, ticket) = state
        .run_db(move |conn| {
            let now = Utc::now();
            let delivered: Message = diesel::update(messages::table.find(message_id))
                .set((
                    messages::status.eq(MessageStatus::Sended.as_str()),
                    messages::ack.eq(1),
                    messages::external_id.eq(sent.external_id),
                    messages::updated_at.eq(now),
                ))
                .returning(Message::as_returning())
                .get_result(conn)?;
            let ticket = touch_ticket(conn, ticket.id, &delivered.body, true, now)?;
            Ok((delivered, ticket))
        })
        .await?;

    emit(
        state,
        SocketEvent::new(ticket.tenant_id, EventKind::ChatUpdate, &delivered),
    );
    emit(
        state,
        SocketEvent::new(ticket.tenant_id, EventKind::TicketUpdate, &ticket),
    );
    Ok(delivered)
}

/// Sends every scheduled message whose time has come. A message that fails is
/// marked failed (ack -1) so it is not retried on every run.
pub async fn dispatch_scheduled(state: &AppState, now: DateTime<Utc>) -> AppResult<usize> {
    let due = state.run_db(move |conn| Ok(due_messages(conn, now)?)).await?;
    let mut sent = 0;
    for message in &due {
        match deliver(state, message).await {
            Ok(_) => sent += 1,
            Err(e) => {
                warn!("Scheduled message {} failed: {e}", message.id);
                let id = message.id;
                state
                    .run_db(move |conn| {
                        diesel::update(messages::table.find(id))
                            .set((
                                messages::status.eq(MessageStatus::Sended.as_str()),
                                messages::ack.eq(-1),
                                messages::updated_at.eq(Utc::now()),
                            ))
                            .execute(conn)?;
                        Ok(())
                    })
                    .await?;
            }
        }
    }
    if sent > 0 {
        info!("Dispatched {sent} scheduled messages");
    }
    Ok(sent)
}
