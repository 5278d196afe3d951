//! Auto-reply flows: storage, CRUD and the runtime that drives tickets
//! through them.

pub mod engine;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::contacts::{find_contact, Contact};
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::{chat_flows, tickets};
use crate::core::shared::state::AppState;
use crate::messages::{send_best_effort, Outgoing, SendType};
use crate::queues::ensure_queue;
use crate::realtime::{emit, EventKind, SocketEvent};
use crate::tickets::service::{create_log, find_ticket, update_ticket};
use crate::tickets::{LogType, Ticket, TicketChange, TicketStatus};
use crate::users::ensure_user;
use crate::whatsapp::{find_connection, Whatsapp};

pub use engine::{FlowDefinition, FlowTransition, Outcome};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = chat_flows)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ChatFlow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub flow: serde_json::Value,
    pub user_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ChatFlowRequest {
    pub name: String,
    pub flow: serde_json::Value,
    pub is_active: Option<bool>,
}

fn parse_definition(value: &serde_json::Value) -> AppResult<FlowDefinition> {
    let definition = FlowDefinition::from_value(value)
        .map_err(|e| AppError::BadRequest(format!("ERR_INVALID_FLOW: {e}")))?;
    definition
        .validate()
        .map_err(|e| AppError::BadRequest(format!("ERR_INVALID_FLOW: {e}")))?;
    Ok(definition)
}

fn find_flow(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> AppResult<ChatFlow> {
    chat_flows::table
        .filter(chat_flows::id.eq(id))
        .filter(chat_flows::tenant_id.eq(tenant_id))
        .select(ChatFlow::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ERR_NO_CHAT_FLOW_FOUND"))
}

/// Active flow definition, or `None` when the flow is gone, disabled or unreadable.
fn active_definition(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> QueryResult<Option<FlowDefinition>> {
    let flow: Option<ChatFlow> = chat_flows::table
        .filter(chat_flows::id.eq(id))
        .filter(chat_flows::tenant_id.eq(tenant_id))
        .filter(chat_flows::is_active.eq(true))
        .select(ChatFlow::as_select())
        .first(conn)
        .optional()?;
    Ok(flow.and_then(|f| match FlowDefinition::from_value(&f.flow) {
        Ok(definition) => Some(definition),
        Err(e) => {
            warn!("Chat flow {} has an unreadable definition: {e}", f.id);
            None
        }
    }))
}

fn set_flow_state(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    flow_id: Option<Uuid>,
    step: Option<&str>,
    retries: i32,
) -> QueryResult<Ticket> {
    diesel::update(tickets::table.find(ticket_id))
        .set((
            tickets::chat_flow_id.eq(flow_id),
            tickets::step_chat_flow.eq(step),
            tickets::bot_retries.eq(retries),
            tickets::updated_at.eq(Utc::now()),
        ))
        .returning(Ticket::as_returning())
        .get_result(conn)
}

/// Queues and users a flow hands tickets to must belong to the flow's tenant.
fn check_targets(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    definition: &FlowDefinition,
) -> AppResult<()> {
    fn unknown(what: &'static str, id: Uuid) -> impl FnOnce(AppError) -> AppError {
        move |e| match e {
            AppError::NotFound(_) => {
                AppError::BadRequest(format!("ERR_INVALID_FLOW: unknown {what} {id}"))
            }
            other => other,
        }
    }
    let (queue_ids, user_ids) = definition.targets();
    for queue_id in queue_ids {
        ensure_queue(conn, tenant_id, queue_id).map_err(unknown("queue", queue_id))?;
    }
    for user_id in user_ids {
        ensure_user(conn, tenant_id, user_id).map_err(unknown("user", user_id))?;
    }
    Ok(())
}

/// Whether `minutes` of silence have passed since `since`. A deadline past the
/// end of the calendar never arrives.
fn timed_out(since: DateTime<Utc>, minutes: i64, now: DateTime<Utc>) -> bool {
    Duration::try_minutes(minutes)
        .and_then(|wait| since.checked_add_signed(wait))
        .is_some_and(|deadline| deadline <= now)
}

/// Where the database left a ticket after a flow outcome.
enum Applied {
    Done(Ticket),
    /// The flow hands the ticket over; the change still has to go through the lifecycle.
    Handoff(Ticket, TicketChange),
}

/// Leaves the flow instead of handing off to a queue or user of another tenant.
fn leave_on_foreign_target(
    conn: &mut PgConnection,
    flow_id: Uuid,
    ticket: &Ticket,
    check: AppResult<()>,
) -> AppResult<Option<Ticket>> {
    match check {
        Ok(()) => Ok(None),
        Err(AppError::NotFound(code)) => {
            warn!("Chat flow {flow_id} hands ticket {} to a missing target ({code})", ticket.id);
            Ok(Some(set_flow_state(conn, ticket.id, None, None, 0)?))
        }
        Err(e) => Err(e),
    }
}

fn persist_transition(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    ticket_id: Uuid,
    flow_id: Uuid,
    transition: FlowTransition,
) -> AppResult<Applied> {
    let ticket = find_ticket(conn, tenant_id, ticket_id)?;
    let applied = match transition {
        FlowTransition::Stay { retries } => Applied::Done(set_flow_state(
            conn,
            ticket.id,
            Some(flow_id),
            ticket.step_chat_flow.as_deref(),
            retries,
        )?),
        FlowTransition::Goto { step } => {
            let updated = set_flow_state(conn, ticket.id, Some(flow_id), Some(&step), 0)?;
            create_log(conn, &updated, LogType::ChatBot, None)?;
            Applied::Done(updated)
        }
        FlowTransition::Leave => Applied::Done(set_flow_state(conn, ticket.id, None, None, 0)?),
        FlowTransition::Queue(queue_id) => {
            let check = ensure_queue(conn, tenant_id, queue_id).map(|_| ());
            if let Some(left) = leave_on_foreign_target(conn, flow_id, &ticket, check)? {
                return Ok(Applied::Done(left));
            }
            let ticket = set_flow_state(conn, ticket.id, None, None, 0)?;
            let change = TicketChange {
                queue_id: Some(Some(queue_id)),
                ..Default::default()
            };
            Applied::Handoff(ticket, change)
        }
        FlowTransition::User(user_id) => {
            let check = ensure_user(conn, tenant_id, user_id);
            if let Some(left) = leave_on_foreign_target(conn, flow_id, &ticket, check)? {
                return Ok(Applied::Done(left));
            }
            let change = TicketChange {
                status: Some(TicketStatus::Open),
                user_id: Some(Some(user_id)),
                ..Default::default()
            };
            Applied::Handoff(ticket, change)
        }
        FlowTransition::Close => {
            let change = TicketChange {
                status: Some(TicketStatus::Closed),
                ..Default::default()
            };
            Applied::Handoff(ticket, change)
        }
    };
    Ok(applied)
}

/// Sends the outcome's messages, then moves the ticket as the outcome says.
async fn apply_outcome(
    state: &AppState,
    ticket: &Ticket,
    contact: &Contact,
    connection: &Whatsapp,
    flow_id: Uuid,
    outcome: Outcome,
) -> AppResult<Ticket> {
    for text in &outcome.messages {
        send_best_effort(
            state,
            ticket,
            contact,
            connection,
            Outgoing::new(text.as_str(), SendType::Bot),
        )
        .await;
    }

    let (tenant_id, ticket_id) = (ticket.tenant_id, ticket.id);
    let transition = outcome.transition;
    let applied = state
        .run_db(move |conn| persist_transition(conn, tenant_id, ticket_id, flow_id, transition))
        .await?;
    match applied {
        Applied::Done(updated) => {
            emit(
                state,
                SocketEvent::new(updated.tenant_id, EventKind::TicketUpdate, &updated),
            );
            Ok(updated)
        }
        Applied::Handoff(ticket, change) => update_ticket(state, ticket, change, None, None).await,
    }
}

/// Puts a fresh ticket into `flow_id` and sends the first step.
pub async fn start_flow(
    state: &AppState,
    ticket: &Ticket,
    contact: &Contact,
    connection: &Whatsapp,
    flow_id: Uuid,
) -> AppResult<Option<Ticket>> {
    let tenant_id = ticket.tenant_id;
    let Some(definition) = state
        .run_db(move |conn| Ok(active_definition(conn, tenant_id, flow_id)?))
        .await?
    else {
        debug!("Chat flow {flow_id} unavailable for ticket {}", ticket.id);
        return Ok(None);
    };
    let Some(outcome) = definition.start() else {
        warn!("Chat flow {flow_id} has no entry step");
        return Ok(None);
    };
    info!("Ticket {} entering chat flow {flow_id}", ticket.id);
    let ticket = apply_outcome(state, ticket, contact, connection, flow_id, outcome).await?;
    Ok(Some(ticket))
}

/// Feeds a contact's reply to the flow the ticket is in.
pub async fn handle_reply(
    state: &AppState,
    ticket: &Ticket,
    contact: &Contact,
    connection: &Whatsapp,
    body: &str,
) -> AppResult<Option<Ticket>> {
    let (Some(flow_id), Some(step)) = (ticket.chat_flow_id, ticket.step_chat_flow.as_deref()) else {
        return Ok(None);
    };
    let (tenant_id, ticket_id) = (ticket.tenant_id, ticket.id);
    let Some(definition) = state
        .run_db(move |conn| Ok(active_definition(conn, tenant_id, flow_id)?))
        .await?
    else {
        let cleared = state
            .run_db(move |conn| Ok(set_flow_state(conn, ticket_id, None, None, 0)?))
            .await?;
        return Ok(Some(cleared));
    };
    let outcome = definition.evaluate(step, ticket.bot_retries, body);
    debug!("Ticket {} flow step {step} -> {:?}", ticket.id, outcome.transition);
    let ticket = apply_outcome(state, ticket, contact, connection, flow_id, outcome).await?;
    Ok(Some(ticket))
}

/// A ticket whose flow went silent, with what it needs to apply the destiny.
struct Expired {
    ticket: Ticket,
    flow_id: Uuid,
    contact: Contact,
    connection: Whatsapp,
    outcome: Outcome,
}

fn expired_tickets(conn: &mut PgConnection, now: DateTime<Utc>) -> AppResult<Vec<Expired>> {
    let waiting: Vec<Ticket> = tickets::table
        .filter(tickets::chat_flow_id.is_not_null())
        .filter(tickets::step_chat_flow.is_not_null())
        .filter(tickets::status.eq(TicketStatus::Pending.as_str()))
        .select(Ticket::as_select())
        .load(conn)?;

    let mut expired = Vec::new();
    for ticket in waiting {
        let Some(flow_id) = ticket.chat_flow_id else {
            continue;
        };
        let Some(definition) = active_definition(conn, ticket.tenant_id, flow_id)? else {
            continue;
        };
        let Some((minutes, outcome)) = definition.on_timeout() else {
            continue;
        };
        if !timed_out(ticket.updated_at, minutes, now) {
            continue;
        }
        let contact = find_contact(conn, ticket.tenant_id, ticket.contact_id)?;
        let connection = find_connection(conn, ticket.tenant_id, ticket.whatsapp_id)?;
        expired.push(Expired {
            ticket,
            flow_id,
            contact,
            connection,
            outcome,
        });
    }
    Ok(expired)
}

/// Applies the no-response destiny to tickets idle in a flow for too long.
pub async fn process_timeouts(state: &AppState, now: DateTime<Utc>) -> AppResult<usize> {
    let expired = state.run_db(move |conn| expired_tickets(conn, now)).await?;

    let mut handled = 0;
    for e in expired {
        let id = e.ticket.id;
        match apply_outcome(state, &e.ticket, &e.contact, &e.connection, e.flow_id, e.outcome).await {
            Ok(_) => handled += 1,
            Err(err) => warn!("Flow timeout failed for ticket {id}: {err}"),
        }
    }
    Ok(handled)
}

pub async fn list_chat_flows(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Vec<ChatFlow>>> {
    let rows = state
        .run_db(move |conn| {
            Ok(chat_flows::table
                .filter(chat_flows::tenant_id.eq(auth.tenant_id))
                .order(chat_flows::name.asc())
                .select(ChatFlow::as_select())
                .load(conn)?)
        })
        .await?;
    Ok(Json(rows))
}

pub async fn get_chat_flow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ChatFlow>> {
    let flow = state
        .run_db(move |conn| find_flow(conn, auth.tenant_id, id))
        .await?;
    Ok(Json(flow))
}

pub async fn create_chat_flow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<ChatFlowRequest>,
) -> AppResult<Json<ChatFlow>> {
    auth.require_admin()?;
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("ERR_INVALID_FLOW"));
    }
    let definition = parse_definition(&req.flow)?;

    let now = Utc::now();
    let flow = ChatFlow {
        id: Uuid::new_v4(),
        tenant_id: auth.tenant_id,
        name: req.name.trim().to_string(),
        flow: req.flow,
        user_id: Some(auth.user_id),
        is_active: req.is_active.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };
    let flow = state
        .run_db(move |conn| {
            check_targets(conn, flow.tenant_id, &definition)?;
            diesel::insert_into(chat_flows::table)
                .values(&flow)
                .execute(conn)?;
            Ok(flow)
        })
        .await?;
    info!("Chat flow {} created", flow.id);
    Ok(Json(flow))
}

pub async fn update_chat_flow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ChatFlowRequest>,
) -> AppResult<Json<ChatFlow>> {
    auth.require_admin()?;
    let definition = parse_definition(&req.flow)?;
    let tenant_id = auth.tenant_id;
    let updated = state
        .run_db(move |conn| {
            let current = find_flow(conn, tenant_id, id)?;
            check_targets(conn, tenant_id, &definition)?;
            Ok(diesel::update(chat_flows::table.find(id))
                .set((
                    chat_flows::name.eq(req.name.trim()),
                    chat_flows::flow.eq(req.flow),
                    chat_flows::is_active.eq(req.is_active.unwrap_or(current.is_active)),
                    chat_flows::updated_at.eq(Utc::now()),
                ))
                .returning(ChatFlow::as_returning())
                .get_result(conn)?)
        })
        .await?;
    Ok(Json(updated))
}

pub async fn delete_chat_flow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    state
        .run_db(move |conn| {
            find_flow(conn, tenant_id, id)?;
            conn.transaction::<_, AppError, _>(|conn| {
                // tickets sitting in the flow drop out of it
                diesel::update(tickets::table.filter(tickets::chat_flow_id.eq(id)))
                    .set((
                        tickets::chat_flow_id.eq(None::<Uuid>),
                        tickets::step_chat_flow.eq(None::<String>),
                        tickets::bot_retries.eq(0),
                    ))
                    .execute(conn)?;
                diesel::delete(chat_flows::table.find(id)).execute(conn)?;
                Ok(())
            })
        })
        .await?;
    info!("Chat flow {id} deleted");
    Ok(Json(serde_json::json!({ "message": "Chat flow deleted" })))
}

pub fn configure_chat_flow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/chat-flow", get(list_chat_flows).post(create_chat_flow))
        .route(
            "/api/chat-flow/{id}",
            get(get_chat_flow)
                .put(update_chat_flow)
                .delete(delete_chat_flow),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_definition_reports_code() {
        let err = parse_definition(&json!({"nodes": []})).unwrap_err();
        assert!(err.to_string().starts_with("ERR_INVALID_FLOW"));
    }

    #[test]
    fn test_parse_definition_accepts_minimal_flow() {
        let value = json!({
            "nodes": [
                {"type": "start", "id": "s", "next": "hello"},
                {"type": "node", "id": "hello", "interactions": ["Hi"]}
            ]
        });
        let definition = parse_definition(&value).unwrap();
        assert_eq!(definition.nodes.len(), 2);
    }

    #[test]
    fn test_timed_out() {
        let since = Utc::now();
        assert!(!timed_out(since, 10, since + Duration::minutes(9)));
        assert!(timed_out(since, 10, since + Duration::minutes(10)));
        // a deadline beyond the representable range is never reached
        assert!(!timed_out(since, i64::MAX, since));
        assert!(!timed_out(DateTime::<Utc>::MAX_UTC, 1, since));
    }
}
