//! Routing of messages arriving from a channel webhook.

use chrono::Utc;
use diesel::PgConnection;
use log::{debug, info};
use uuid::Uuid;

use super::{record_inbound, send_best_effort, InboundContent, Message, Outgoing, SendType};
use crate::chat_flow;
use crate::contacts::{find_or_create_contact, Contact};
use crate::core::error::AppResult;
use crate::core::shared::state::AppState;
use crate::realtime::{emit, EventKind, SocketEvent};
use crate::settings::load_settings;
use crate::tenants::{find_tenant, is_within_business_hours};
use crate::tickets::lifecycle::chat_flow_for_new_ticket;
use crate::tickets::service::{find_or_create_ticket, InboundTicket, Resolution};
use crate::tickets::Ticket;
use crate::whatsapp::Whatsapp;

/// A message as reported by a channel, before contacts and tickets are resolved.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    /// Sender's number
    pub number: String,
    pub name: Option<String>,
    /// Group id and subject when the message was posted in a group
    pub group: Option<(String, Option<String>)>,
    pub content: InboundContent,
    pub unread: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Ignored,
    Recorded,
}

/// Database side of the pipeline for one accepted message.
struct Routed {
    ticket: Ticket,
    owner: Contact,
    message: Message,
    group: Option<Contact>,
    /// Set for a new unassigned ticket opened outside business hours; holds the
    /// tenant's reply, if it has one.
    outside_hours: Option<Option<String>>,
    /// Chat flow the new ticket enters.
    start_flow: Option<Uuid>,
    reply_to_flow: bool,
}

fn route_inbound(
    conn: &mut PgConnection,
    connection: &Whatsapp,
    msg: &InboundMessage,
) -> AppResult<Option<Routed>> {
    let tenant_id = connection.tenant_id;
    let settings = load_settings(conn, tenant_id)?;

    if msg.group.is_some() && settings.ignore_group_msg {
        debug!("Ignoring group message on connection {}", connection.id);
        return Ok(None);
    }

    let sender = find_or_create_contact(conn, tenant_id, &msg.number, msg.name.as_deref(), false)?;
    let group = match &msg.group {
        Some((group_id, subject)) => Some(find_or_create_contact(
            conn,
            tenant_id,
            group_id,
            subject.as_deref(),
            true,
        )?),
        None => None,
    };
    let owner = group.clone().unwrap_or_else(|| sender.clone());

    let inbound = InboundTicket {
        connection,
        contact: &owner,
        from_me: msg.content.from_me,
        unread: if msg.content.from_me { 0 } else { msg.unread.max(1) },
        external_id: msg.content.external_id.as_deref(),
        body: &msg.content.body,
    };
    let resolution = find_or_create_ticket(conn, &inbound, &settings)?;
    let Some(ticket) = resolution.ticket() else {
        return Ok(None);
    };
    let created = matches!(resolution, Resolution::Created(_));

    let (message, ticket) = record_inbound(conn, ticket, &sender, &msg.content)?;
    let mut routed = Routed {
        ticket,
        owner,
        message,
        group,
        outside_hours: None,
        start_flow: None,
        reply_to_flow: false,
    };
    if msg.content.from_me {
        return Ok(Some(routed));
    }

    let ticket = &routed.ticket;
    if created && ticket.user_id.is_none() && !ticket.is_group {
        let tenant = find_tenant(conn, tenant_id)?;
        if !is_within_business_hours(&tenant.hours(), Utc::now().naive_utc()) {
            let reply = tenant
                .message_business_hours
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            routed.outside_hours = Some(reply);
        } else {
            routed.start_flow = chat_flow_for_new_ticket(
                connection.chat_flow_id,
                &settings,
                ticket.user_id,
                ticket.is_group,
                false,
            );
        }
    } else {
        routed.reply_to_flow = ticket.in_chat_flow();
    }
    Ok(Some(routed))
}

pub async fn handle_inbound(
    state: &AppState,
    connection: &Whatsapp,
    msg: InboundMessage,
) -> AppResult<InboundOutcome> {
    let tenant_id = connection.tenant_id;
    let owned = connection.clone();
    let Some(routed) = state
        .run_db(move |conn| route_inbound(conn, &owned, &msg))
        .await?
    else {
        return Ok(InboundOutcome::Ignored);
    };

    if let Some(group) = &routed.group {
        emit(
            state,
            SocketEvent::new(tenant_id, EventKind::ContactUpdate, group),
        );
    }
    emit(
        state,
        SocketEvent::new(tenant_id, EventKind::ChatCreate, &routed.message),
    );
    emit(
        state,
        SocketEvent::new(tenant_id, EventKind::TicketUpdate, &routed.ticket),
    );

    let Routed {
        ticket,
        owner,
        message,
        outside_hours,
        start_flow,
        reply_to_flow,
        ..
    } = routed;

    if let Some(reply) = outside_hours {
        info!("Ticket {} opened outside business hours", ticket.id);
        if let Some(text) = reply {
            send_best_effort(
                state,
                &ticket,
                &owner,
                connection,
                Outgoing::new(text, SendType::Hours),
            )
            .await;
        }
    } else if let Some(flow_id) = start_flow {
        chat_flow::start_flow(state, &ticket, &owner, connection, flow_id).await?;
    } else if reply_to_flow {
        chat_flow::handle_reply(state, &ticket, &owner, connection, &message.body).await?;
    }
    Ok(InboundOutcome::Recorded)
}
