use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Text};
use log::{debug, info, warn};
use uuid::Uuid;

use super::lifecycle::{
    self, can_view, plan_inbound_ticket, plan_new_ticket, plan_transition, visibility_scope,
    ConversationFacts, LogType, TicketChange, TicketPlan, TicketStatus, Transition, Viewer,
};
use super::{Ticket, TicketLog, TicketView};
use crate::auth::{AuthUser, ERR_NO_PERMISSION};
use crate::contacts::{find_contact, first_wallet_user, Contact};
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::{campaign_contacts, contacts, logs_tickets, messages, tickets};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::Page;
use crate::messages::{send_best_effort, Outgoing, SendType};
use crate::realtime::{emit, EventKind, SocketEvent};
use crate::settings::TenantSettings;
use crate::users::user_queue_ids;
use crate::whatsapp::{find_connection, Whatsapp};

pub const ERR_NO_TICKET_FOUND: &str = "ERR_NO_TICKET_FOUND";
pub const ERR_OTHER_OPEN_TICKET: &str = "ERR_OTHER_OPEN_TICKET";

const ACTIVE_STATUSES: [&str; 2] = ["open", "pending"];

pub fn find_ticket(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> AppResult<Ticket> {
    tickets::table
        .filter(tickets::id.eq(id))
        .filter(tickets::tenant_id.eq(tenant_id))
        .select(Ticket::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found(ERR_NO_TICKET_FOUND))
}

pub fn create_log(
    conn: &mut PgConnection,
    ticket: &Ticket,
    log_type: LogType,
    user_id: Option<Uuid>,
) -> QueryResult<()> {
    let log = TicketLog {
        id: Uuid::new_v4(),
        tenant_id: ticket.tenant_id,
        ticket_id: ticket.id,
        user_id,
        queue_id: ticket.queue_id,
        log_type: log_type.as_str().to_string(),
        created_at: Utc::now(),
    };
    diesel::insert_into(logs_tickets::table)
        .values(&log)
        .execute(conn)?;
    Ok(())
}

pub fn list_logs(conn: &mut PgConnection, ticket: &Ticket) -> QueryResult<Vec<TicketLog>> {
    logs_tickets::table
        .filter(logs_tickets::ticket_id.eq(ticket.id))
        .order(logs_tickets::created_at.asc())
        .select(TicketLog::as_select())
        .load(conn)
}

pub fn find_active_ticket(
    conn: &mut PgConnection,
    whatsapp_id: Uuid,
    contact_id: Uuid,
) -> QueryResult<Option<Ticket>> {
    tickets::table
        .filter(tickets::whatsapp_id.eq(whatsapp_id))
        .filter(tickets::contact_id.eq(contact_id))
        .filter(tickets::status.eq_any(ACTIVE_STATUSES))
        .order(tickets::updated_at.desc())
        .select(Ticket::as_select())
        .first(conn)
        .optional()
}

fn latest_ticket(
    conn: &mut PgConnection,
    whatsapp_id: Uuid,
    contact_id: Uuid,
) -> QueryResult<Option<Ticket>> {
    tickets::table
        .filter(tickets::whatsapp_id.eq(whatsapp_id))
        .filter(tickets::contact_id.eq(contact_id))
        .order(tickets::updated_at.desc())
        .select(Ticket::as_select())
        .first(conn)
        .optional()
}

/// Serialises find-or-create for one contact on one connection.
fn lock_conversation(conn: &mut PgConnection, whatsapp_id: Uuid, contact_id: Uuid) -> QueryResult<()> {
    diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind::<Text, _>(format!("{whatsapp_id}:{contact_id}"))
        .execute(conn)?;
    Ok(())
}

/// A message about to be attached to a ticket.
#[derive(Debug, Clone)]
pub struct InboundTicket<'a> {
    pub connection: &'a Whatsapp,
    /// Ticket owner: the group for group messages, the sender otherwise
    pub contact: &'a Contact,
    pub from_me: bool,
    pub unread: i32,
    pub external_id: Option<&'a str>,
    pub body: &'a str,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    /// Our own campaign message echoed back.
    CampaignEcho,
    /// Our own farewell echoed back on a closed ticket.
    Farewell(Ticket),
    Existing(Ticket),
    Reopened(Ticket),
    Created(Ticket),
}

impl Resolution {
    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            Self::CampaignEcho | Self::Farewell(_) => None,
            Self::Existing(t) | Self::Reopened(t) | Self::Created(t) => Some(t),
        }
    }
}

fn is_campaign_echo(conn: &mut PgConnection, external_id: &str) -> QueryResult<bool> {
    let count: i64 = campaign_contacts::table
        .filter(campaign_contacts::external_id.eq(external_id))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

/// Closed ticket whose stored farewell message has this id and body. The
/// message row keeps the full text, unlike the ticket's preview.
fn farewell_ticket(
    conn: &mut PgConnection,
    external_id: &str,
    body: &str,
) -> QueryResult<Option<Uuid>> {
    tickets::table
        .inner_join(messages::table)
        .filter(messages::external_id.eq(external_id))
        .filter(messages::send_type.eq(SendType::Farewell.as_str()))
        .filter(messages::body.eq(body))
        .filter(tickets::status.eq(TicketStatus::Closed.as_str()))
        .select(tickets::id)
        .first(conn)
        .optional()
}

fn conversation_facts(conn: &mut PgConnection, inbound: &InboundTicket<'_>) -> QueryResult<ConversationFacts> {
    let (whatsapp_id, contact_id) = (inbound.connection.id, inbound.contact.id);
    let mut facts = ConversationFacts {
        from_me: inbound.from_me,
        is_group: inbound.contact.is_group,
        ..ConversationFacts::default()
    };
    if let (true, Some(external_id)) = (inbound.from_me, inbound.external_id) {
        facts.campaign_echo = is_campaign_echo(conn, external_id)?;
        if !facts.campaign_echo {
            facts.farewell_ticket = farewell_ticket(conn, external_id, inbound.body)?;
        }
    }
    facts.active_ticket = find_active_ticket(conn, whatsapp_id, contact_id)?.map(|t| t.id);
    if facts.active_ticket.is_none() {
        facts.latest_ticket =
            latest_ticket(conn, whatsapp_id, contact_id)?.map(|t| (t.id, t.updated_at));
    }
    Ok(facts)
}

fn reopen_as_pending(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    unread: i32,
    now: DateTime<Utc>,
) -> QueryResult<Ticket> {
    let reopened: Ticket = diesel::update(tickets::table.find(ticket_id))
        .set((
            tickets::status.eq(TicketStatus::Pending.as_str()),
            tickets::user_id.eq(None::<Uuid>),
            tickets::closed_at.eq(None::<DateTime<Utc>>),
            tickets::unread_messages.eq(unread),
            tickets::is_farewell_message.eq(false),
            tickets::chat_flow_id.eq(None::<Uuid>),
            tickets::step_chat_flow.eq(None::<String>),
            tickets::bot_retries.eq(0),
            tickets::updated_at.eq(now),
        ))
        .returning(Ticket::as_returning())
        .get_result(conn)?;
    create_log(conn, &reopened, LogType::Reopen, None)?;
    Ok(reopened)
}

fn create_inbound_ticket(
    conn: &mut PgConnection,
    inbound: &InboundTicket<'_>,
    settings: &TenantSettings,
    now: DateTime<Utc>,
) -> AppResult<Ticket> {
    let connection = inbound.connection;
    let contact = inbound.contact;
    let wallet_user = if settings.direct_tickets_to_wallets && !contact.is_group {
        first_wallet_user(conn, contact.id)?
    } else {
        None
    };
    let plan = plan_new_ticket(settings, wallet_user, now);

    let ticket = Ticket {
        id: Uuid::new_v4(),
        tenant_id: connection.tenant_id,
        contact_id: contact.id,
        whatsapp_id: connection.id,
        user_id: plan.user_id,
        queue_id: None,
        status: plan.status.as_str().to_string(),
        channel: connection.channel.clone(),
        unread_messages: inbound.unread,
        last_message: None,
        last_message_at: None,
        answered: false,
        is_group: contact.is_group,
        is_farewell_message: false,
        chat_flow_id: None,
        step_chat_flow: None,
        bot_retries: 0,
        started_attendance_at: plan.started_attendance_at,
        closed_at: None,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(tickets::table)
        .values(&ticket)
        .execute(conn)?;
    create_log(conn, &ticket, LogType::Create, None)?;
    if let Some(user_id) = ticket.user_id {
        create_log(conn, &ticket, LogType::UserDefine, Some(user_id))?;
    }
    info!("Ticket {} created for contact {}", ticket.id, contact.id);
    Ok(ticket)
}

/// Finds the conversation an inbound message belongs to, reopening or creating
/// one as needed. Never creates a second active ticket for the same contact and
/// connection.
pub fn find_or_create_ticket(
    conn: &mut PgConnection,
    inbound: &InboundTicket<'_>,
    settings: &TenantSettings,
) -> AppResult<Resolution> {
    let connection = inbound.connection;
    let contact = inbound.contact;

    conn.transaction::<_, AppError, _>(|conn| {
        lock_conversation(conn, connection.id, contact.id)?;
        let now = Utc::now();
        let facts = conversation_facts(conn, inbound)?;

        match plan_inbound_ticket(&facts, now) {
            TicketPlan::IgnoreCampaignEcho => {
                debug!("Skipping campaign echo {:?}", inbound.external_id);
                Ok(Resolution::CampaignEcho)
            }
            TicketPlan::MarkFarewell(id) => {
                let ticket = diesel::update(tickets::table.find(id))
                    .set(tickets::is_farewell_message.eq(true))
                    .returning(Ticket::as_returning())
                    .get_result(conn)?;
                Ok(Resolution::Farewell(ticket))
            }
            TicketPlan::Reuse(id) => {
                let current: Ticket = tickets::table
                    .find(id)
                    .select(Ticket::as_select())
                    .first(conn)?;
                let unread = lifecycle::next_unread(
                    connection.channel_type(),
                    current.unread_messages,
                    inbound.unread,
                );
                let ticket = diesel::update(tickets::table.find(id))
                    .set((
                        tickets::unread_messages.eq(unread),
                        tickets::updated_at.eq(now),
                    ))
                    .returning(Ticket::as_returning())
                    .get_result(conn)?;
                Ok(Resolution::Existing(ticket))
            }
            TicketPlan::Reopen(id) => {
                let ticket = reopen_as_pending(conn, id, inbound.unread, now)?;
                info!("Ticket {} reopened for contact {}", ticket.id, contact.id);
                Ok(Resolution::Reopened(ticket))
            }
            TicketPlan::Create => Ok(Resolution::Created(create_inbound_ticket(
                conn, inbound, settings, now,
            )?)),
        }
    })
}

/// Persists a planned transition and its logs.
pub fn apply_transition(
    conn: &mut PgConnection,
    ticket: &Ticket,
    transition: &Transition,
    actor: Option<Uuid>,
) -> AppResult<Ticket> {
    let now = Utc::now();
    conn.transaction::<_, AppError, _>(|conn| {
        let mut updated: Ticket = diesel::update(tickets::table.find(ticket.id))
            .set((
                tickets::status.eq(transition.status.as_str()),
                tickets::user_id.eq(transition.user_id),
                tickets::queue_id.eq(transition.queue_id),
                tickets::started_attendance_at.eq(transition.started_attendance_at),
                tickets::updated_at.eq(now),
            ))
            .returning(Ticket::as_returning())
            .get_result(conn)?;

        if let Some(closed_at) = transition.closed_at {
            updated = diesel::update(tickets::table.find(ticket.id))
                .set(tickets::closed_at.eq(closed_at))
                .returning(Ticket::as_returning())
                .get_result(conn)?;
        }
        if transition.clear_chat_flow && (updated.chat_flow_id.is_some() || updated.step_chat_flow.is_some()) {
            updated = diesel::update(tickets::table.find(ticket.id))
                .set((
                    tickets::chat_flow_id.eq(None::<Uuid>),
                    tickets::step_chat_flow.eq(None::<String>),
                    tickets::bot_retries.eq(0),
                ))
                .returning(Ticket::as_returning())
                .get_result(conn)?;
        }
        if transition.status == TicketStatus::Open && updated.unread_messages > 0 {
            updated = diesel::update(tickets::table.find(ticket.id))
                .set(tickets::unread_messages.eq(0))
                .returning(Ticket::as_returning())
                .get_result(conn)?;
        }

        for log_type in &transition.logs {
            create_log(conn, &updated, *log_type, actor)?;
        }
        Ok(updated)
    })
}

fn ensure_no_other_active(conn: &mut PgConnection, ticket: &Ticket) -> AppResult<()> {
    let other: i64 = tickets::table
        .filter(tickets::whatsapp_id.eq(ticket.whatsapp_id))
        .filter(tickets::contact_id.eq(ticket.contact_id))
        .filter(tickets::id.ne(ticket.id))
        .filter(tickets::status.eq_any(ACTIVE_STATUSES))
        .count()
        .get_result(conn)?;
    if other > 0 {
        return Err(AppError::conflict(ERR_OTHER_OPEN_TICKET));
    }
    Ok(())
}

/// Connection, contact and text of the farewell a closing ticket should send.
fn farewell_for(conn: &mut PgConnection, ticket: &Ticket) -> AppResult<Option<(Whatsapp, Contact, String)>> {
    let connection = find_connection(conn, ticket.tenant_id, ticket.whatsapp_id)?;
    let Some(text) = connection
        .farewell_message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
    else {
        return Ok(None);
    };
    let contact = find_contact(conn, ticket.tenant_id, ticket.contact_id)?;
    Ok(Some((connection, contact, text)))
}

/// Changes status, user or queue of a ticket. Closing sends the connection's
/// farewell message to non-group contacts once the change is committed.
pub async fn update_ticket(
    state: &AppState,
    ticket: Ticket,
    change: TicketChange,
    actor: Option<Uuid>,
    extra_log: Option<LogType>,
) -> AppResult<Ticket> {
    let (mut updated, farewell) = state
        .run_db(move |conn| {
            let transition = plan_transition(&ticket.state(), &change, actor, Utc::now())?;
            if transition.reopened {
                ensure_no_other_active(conn, &ticket)?;
            }

            let updated = apply_transition(conn, &ticket, &transition, actor)?;
            if let Some(log_type) = extra_log {
                create_log(conn, &updated, log_type, actor)?;
            }
            let farewell = if transition.closing && !updated.is_group {
                farewell_for(conn, &updated)?
            } else {
                None
            };
            Ok((updated, farewell))
        })
        .await?;

    if let Some((connection, contact, text)) = farewell {
        let out = Outgoing {
            user_id: actor,
            ..Outgoing::new(text, SendType::Farewell)
        };
        if let Some((_, ticket)) = send_best_effort(state, &updated, &contact, &connection, out).await {
            updated = ticket;
        }
    }

    emit(
        state,
        SocketEvent::new(updated.tenant_id, EventKind::TicketUpdate, &updated),
    );
    Ok(updated)
}

/// Closes tickets idle beyond the tenant's auto-close policy.
pub async fn close_inactive_tickets(
    state: &AppState,
    tenant_id: Uuid,
    settings: &TenantSettings,
    now: DateTime<Utc>,
) -> AppResult<usize> {
    let Some((statuses, cutoff)) = lifecycle::auto_close_policy(settings, now) else {
        return Ok(0);
    };

    let stale: Vec<Ticket> = state
        .run_db(move |conn| {
            let statuses: Vec<&str> = statuses.iter().map(TicketStatus::as_str).collect();
            Ok(tickets::table
                .filter(tickets::tenant_id.eq(tenant_id))
                .filter(tickets::status.eq_any(statuses))
                .filter(tickets::updated_at.lt(cutoff))
                .select(Ticket::as_select())
                .load(conn)?)
        })
        .await?;

    let mut closed = 0;
    for ticket in stale {
        let id = ticket.id;
        let change = TicketChange {
            status: Some(TicketStatus::Closed),
            ..Default::default()
        };
        match update_ticket(state, ticket, change, None, Some(LogType::AutoClose)).await {
            Ok(_) => closed += 1,
            Err(e) => warn!("Auto-close failed for ticket {id}: {e}"),
        }
    }
    if closed > 0 {
        info!("Auto-closed {closed} tickets in tenant {tenant_id}");
    }
    Ok(closed)
}

/// Manual ticket creation by an agent.
pub fn create_manual_ticket(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    contact: &Contact,
    connection: &Whatsapp,
    status: TicketStatus,
    queue_id: Option<Uuid>,
    actor: Uuid,
) -> AppResult<Ticket> {
    conn.transaction::<_, AppError, _>(|conn| {
        lock_conversation(conn, connection.id, contact.id)?;
        if find_active_ticket(conn, connection.id, contact.id)?.is_some() {
            return Err(AppError::conflict(ERR_OTHER_OPEN_TICKET));
        }
        let now = Utc::now();
        let open = status == TicketStatus::Open;
        let ticket = Ticket {
            id: Uuid::new_v4(),
            tenant_id,
            contact_id: contact.id,
            whatsapp_id: connection.id,
            user_id: open.then_some(actor),
            queue_id,
            status: status.as_str().to_string(),
            channel: connection.channel.clone(),
            unread_messages: 0,
            last_message: None,
            last_message_at: None,
            answered: false,
            is_group: contact.is_group,
            is_farewell_message: false,
            chat_flow_id: None,
            step_chat_flow: None,
            bot_retries: 0,
            started_attendance_at: open.then_some(now),
            closed_at: None,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(tickets::table)
            .values(&ticket)
            .execute(conn)?;
        create_log(conn, &ticket, LogType::Create, Some(actor))?;
        if open {
            create_log(conn, &ticket, LogType::Open, Some(actor))?;
        }
        Ok(ticket)
    })
}

pub fn viewer_for(conn: &mut PgConnection, auth: &AuthUser) -> AppResult<Viewer> {
    Ok(Viewer {
        user_id: auth.user_id,
        is_admin: auth.is_admin(),
        queue_ids: user_queue_ids(conn, auth.user_id)?,
    })
}

/// Loads a ticket the caller is allowed to see.
pub fn visible_ticket(
    conn: &mut PgConnection,
    auth: &AuthUser,
    settings: &TenantSettings,
    id: Uuid,
) -> AppResult<Ticket> {
    let ticket = find_ticket(conn, auth.tenant_id, id)?;
    let viewer = viewer_for(conn, auth)?;
    if !can_view(&viewer, settings, &ticket.visibility()) {
        return Err(AppError::forbidden(ERR_NO_PERMISSION));
    }
    Ok(ticket)
}

type TicketFilter = Box<dyn BoxableExpression<tickets::table, Pg, SqlType = Bool>>;

/// SQL counterpart of [`lifecycle::can_view`], built from the same
/// [`lifecycle::VisibilityScope`]; `None` means no restriction.
pub fn visibility_filter(viewer: &Viewer, settings: &TenantSettings) -> Option<TicketFilter> {
    let scope = visibility_scope(viewer, settings)?;
    let own: TicketFilter = Box::new(tickets::user_id.assume_not_null().eq(scope.user_id));

    let mut others: TicketFilter = Box::new(
        tickets::user_id
            .is_null()
            .and(tickets::queue_id.assume_not_null().eq_any(scope.queue_ids)),
    );
    if scope.unqueued {
        others = Box::new(others.or(tickets::user_id.is_null().and(tickets::queue_id.is_null())));
    }
    if scope.assigned_to_others {
        others = Box::new(others.or(tickets::user_id.is_not_null()));
    }
    if scope.hide_chat_flow {
        others = Box::new(others.and(
            tickets::chat_flow_id
                .is_null()
                .or(tickets::step_chat_flow.is_null()),
        ));
    }
    Some(Box::new(own.or(others)))
}

#[derive(Debug, Clone, Default)]
pub struct TicketQuery {
    pub statuses: Vec<TicketStatus>,
    pub search: Option<String>,
    pub queue_ids: Vec<Uuid>,
    pub unread_only: bool,
}

pub fn list_tickets(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    viewer: &Viewer,
    settings: &TenantSettings,
    query: &TicketQuery,
    page: Page,
) -> AppResult<(Vec<TicketView>, i64)> {
    let build = || {
        let mut q = tickets::table
            .filter(tickets::tenant_id.eq(tenant_id))
            .into_boxed();
        if let Some(filter) = visibility_filter(viewer, settings) {
            q = q.filter(filter);
        }
        if !query.statuses.is_empty() {
            let statuses: Vec<&str> = query.statuses.iter().map(TicketStatus::as_str).collect();
            q = q.filter(tickets::status.eq_any(statuses));
        }
        if !query.queue_ids.is_empty() {
            q = q.filter(tickets::queue_id.assume_not_null().eq_any(query.queue_ids.clone()));
        }
        if query.unread_only {
            q = q.filter(tickets::unread_messages.gt(0));
        }
        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{search}%");
            q = q.filter(
                tickets::contact_id
                    .eq_any(
                        contacts::table
                            .filter(contacts::tenant_id.eq(tenant_id))
                            .filter(
                                contacts::name
                                    .ilike(pattern.clone())
                                    .or(contacts::number.ilike(pattern.clone())),
                            )
                            .select(contacts::id),
                    )
                    .or(tickets::last_message.assume_not_null().ilike(pattern)),
            );
        }
        q
    };

    let total: i64 = build().count().get_result(conn)?;
    let rows: Vec<Ticket> = build()
        // pending before open before closed
        .order((tickets::status.desc(), tickets::updated_at.desc()))
        .limit(page.size)
        .offset(page.offset)
        .select(Ticket::as_select())
        .load(conn)?;

    Ok((attach_contacts(conn, rows)?, total))
}

pub fn attach_contacts(conn: &mut PgConnection, rows: Vec<Ticket>) -> QueryResult<Vec<TicketView>> {
    let ids: Vec<Uuid> = rows.iter().map(|t| t.contact_id).collect();
    let found: Vec<Contact> = contacts::table
        .filter(contacts::id.eq_any(ids))
        .select(Contact::as_select())
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|ticket| {
            let contact = found.iter().find(|c| c.id == ticket.contact_id).cloned();
            TicketView { ticket, contact }
        })
        .collect())
}

pub fn delete_ticket(conn: &mut PgConnection, ticket: &Ticket) -> AppResult<()> {
    diesel::delete(tickets::table.find(ticket.id)).execute(conn)?;
    info!("Ticket {} deleted", ticket.id);
    Ok(())
}

pub fn mark_read(conn: &mut PgConnection, ticket: &Ticket) -> AppResult<Ticket> {
    diesel::update(
        messages::table
            .filter(messages::ticket_id.eq(ticket.id))
            .filter(messages::read.eq(false)),
    )
    .set(messages::read.eq(true))
    .execute(conn)?;
    Ok(diesel::update(tickets::table.find(ticket.id))
        .set(tickets::unread_messages.eq(0))
        .returning(Ticket::as_returning())
        .get_result(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::lifecycle::VisibilityFacts;

    fn filter_sql(viewer: &Viewer, settings: &TenantSettings) -> Option<String> {
        visibility_filter(viewer, settings).map(|filter| {
            diesel::debug_query::<Pg, _>(&tickets::table.filter(filter).select(tickets::id))
                .to_string()
        })
    }

    fn agent(queue_ids: Vec<Uuid>) -> Viewer {
        Viewer {
            user_id: Uuid::new_v4(),
            is_admin: false,
            queue_ids,
        }
    }

    #[test]
    fn test_admin_listing_is_unrestricted() {
        let admin = Viewer {
            is_admin: true,
            ..agent(vec![])
        };
        let strict = TenantSettings {
            not_view_assigned_tickets: true,
            not_view_tickets_chat_bot: true,
            ..TenantSettings::default()
        };
        assert!(filter_sql(&admin, &strict).is_none());
        assert!(can_view(
            &admin,
            &strict,
            &VisibilityFacts {
                user_id: Some(Uuid::new_v4()),
                queue_id: None,
                in_chat_flow: true,
            }
        ));
    }

    #[test]
    fn test_filter_follows_the_same_settings_as_can_view() {
        let viewer = agent(vec![Uuid::new_v4()]);
        let assigned_elsewhere = VisibilityFacts {
            user_id: Some(Uuid::new_v4()),
            queue_id: None,
            in_chat_flow: false,
        };
        let unqueued = VisibilityFacts {
            user_id: None,
            queue_id: None,
            in_chat_flow: false,
        };

        let open = TenantSettings::default();
        let sql = filter_sql(&viewer, &open).unwrap();
        assert!(can_view(&viewer, &open, &assigned_elsewhere));
        assert!(sql.contains(r#""tickets"."user_id" IS NOT NULL"#));
        assert!(can_view(&viewer, &open, &unqueued));
        assert!(sql.contains(r#""tickets"."queue_id" IS NULL"#));
        assert!(!sql.contains("chat_flow_id"));

        let strict = TenantSettings {
            not_view_assigned_tickets: true,
            not_view_tickets_queue_undefined: true,
            not_view_tickets_chat_bot: true,
            ..TenantSettings::default()
        };
        let sql = filter_sql(&viewer, &strict).unwrap();
        assert!(!can_view(&viewer, &strict, &assigned_elsewhere));
        assert!(!sql.contains(r#""tickets"."user_id" IS NOT NULL"#));
        assert!(!can_view(&viewer, &strict, &unqueued));
        assert!(!sql.contains(r#""tickets"."queue_id" IS NULL"#));
        assert!(sql.contains(r#""tickets"."chat_flow_id" IS NULL"#));
    }
}
