use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::service::{self, viewer_for, visible_ticket, TicketQuery};
use super::{Ticket, TicketChange, TicketLog, TicketStatus, TicketView};
use crate::auth::AuthUser;
use crate::contacts::find_contact;
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::whatsapps;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{double_option, Page};
use crate::queues::ensure_queue;
use crate::realtime::{emit, EventKind, SocketEvent};
use crate::settings::load_settings;
use crate::users::ensure_user;
use crate::whatsapp::{find_connection, Whatsapp};

const DEFAULT_PAGE_SIZE: i64 = 40;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct TicketListQuery {
    /// Comma separated statuses
    pub status: Option<String>,
    pub search: Option<String>,
    /// Comma separated queue ids
    pub queue_ids: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub show_all: bool,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TicketListResponse {
    pub tickets: Vec<TicketView>,
    pub count: i64,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub contact_id: Uuid,
    pub whatsapp_id: Option<Uuid>,
    pub queue_id: Option<Uuid>,
    pub status: Option<TicketStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTicketRequest {
    pub status: Option<TicketStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub user_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub queue_id: Option<Option<Uuid>>,
}

impl UpdateTicketRequest {
    /// Queue and user the change assigns, both of which must belong to the tenant.
    fn assigned_targets(&self) -> (Option<Uuid>, Option<Uuid>) {
        (self.queue_id.flatten(), self.user_id.flatten())
    }
}

impl From<UpdateTicketRequest> for TicketChange {
    fn from(req: UpdateTicketRequest) -> Self {
        Self {
            status: req.status,
            user_id: req.user_id,
            queue_id: req.queue_id,
        }
    }
}

fn parse_list<T: std::str::FromStr>(raw: Option<&str>) -> Result<Vec<T>, T::Err> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

fn default_connection(conn: &mut PgConnection, tenant_id: Uuid) -> AppResult<Whatsapp> {
    whatsapps::table
        .filter(whatsapps::tenant_id.eq(tenant_id))
        .filter(whatsapps::is_default.eq(true))
        .select(Whatsapp::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ERR_NO_DEF_WAPP_FOUND"))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<TicketListQuery>,
) -> AppResult<Json<TicketListResponse>> {
    let statuses: Vec<TicketStatus> = parse_list(query.status.as_deref())?;
    let queue_ids: Vec<Uuid> = parse_list(query.queue_ids.as_deref())
        .map_err(|_| AppError::bad_request("ERR_INVALID_QUEUE"))?;
    let page = Page::new(
        query.page,
        query
            .per_page
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
    )?;

    let filter = TicketQuery {
        statuses,
        search: query.search,
        queue_ids,
        unread_only: query.unread_only,
    };
    let show_all = query.show_all;
    let (tickets, count) = state
        .run_db(move |conn| {
            let settings = load_settings(conn, auth.tenant_id)?;
            let mut viewer = viewer_for(conn, &auth)?;
            // admins see everything only when they ask for it
            viewer.is_admin = viewer.is_admin && show_all;
            service::list_tickets(conn, auth.tenant_id, &viewer, &settings, &filter, page)
        })
        .await?;
    Ok(Json(TicketListResponse {
        has_more: page.has_more(count),
        tickets,
        count,
    }))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateTicketRequest>,
) -> AppResult<Json<TicketView>> {
    let status = req.status.unwrap_or(TicketStatus::Open);
    if status == TicketStatus::Closed {
        return Err(AppError::bad_request("ERR_INVALID_TICKET_STATUS"));
    }

    let tenant_id = auth.tenant_id;
    let actor = auth.user_id;
    let view = state
        .run_db(move |conn| {
            let contact = find_contact(conn, tenant_id, req.contact_id)?;
            let connection = match req.whatsapp_id {
                Some(id) => find_connection(conn, tenant_id, id)?,
                None => default_connection(conn, tenant_id)?,
            };
            if let Some(queue_id) = req.queue_id {
                ensure_queue(conn, tenant_id, queue_id)?;
            }
            let ticket = service::create_manual_ticket(
                conn,
                tenant_id,
                &contact,
                &connection,
                status,
                req.queue_id,
                actor,
            )?;
            Ok(TicketView {
                ticket,
                contact: Some(contact),
            })
        })
        .await?;
    emit(
        &state,
        SocketEvent::new(tenant_id, EventKind::TicketUpdate, &view.ticket),
    );
    Ok(Json(view))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TicketView>> {
    let view = state
        .run_db(move |conn| {
            let settings = load_settings(conn, auth.tenant_id)?;
            let ticket = visible_ticket(conn, &auth, &settings, id)?;
            let contact = find_contact(conn, auth.tenant_id, ticket.contact_id).ok();
            Ok(TicketView { ticket, contact })
        })
        .await?;
    Ok(Json(view))
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTicketRequest>,
) -> AppResult<Json<TicketView>> {
    let tenant_id = auth.tenant_id;
    let actor = auth.user_id;
    let (queue_id, user_id) = req.assigned_targets();
    let ticket = state
        .run_db(move |conn| {
            let settings = load_settings(conn, tenant_id)?;
            let ticket = visible_ticket(conn, &auth, &settings, id)?;
            if let Some(queue_id) = queue_id {
                ensure_queue(conn, tenant_id, queue_id)?;
            }
            if let Some(user_id) = user_id {
                ensure_user(conn, tenant_id, user_id)?;
            }
            Ok(ticket)
        })
        .await?;

    let ticket = service::update_ticket(&state, ticket, req.into(), Some(actor), None).await?;
    let contact_id = ticket.contact_id;
    let contact = state
        .run_db(move |conn| Ok(find_contact(conn, tenant_id, contact_id).ok()))
        .await?;
    Ok(Json(TicketView { ticket, contact }))
}

pub async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    let ticket = state
        .run_db(move |conn| {
            let ticket = service::find_ticket(conn, tenant_id, id)?;
            log::info!("Ticket {} deletion requested by {}", ticket.id, auth.user_id);
            service::delete_ticket(conn, &ticket)?;
            Ok(ticket)
        })
        .await?;
    emit(
        &state,
        SocketEvent::new(
            tenant_id,
            EventKind::TicketDelete,
            &serde_json::json!({ "id": ticket.id }),
        ),
    );
    Ok(Json(serde_json::json!({ "message": "Ticket deleted" })))
}

pub async fn mark_ticket_read(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Ticket>> {
    let ticket = state
        .run_db(move |conn| {
            let settings = load_settings(conn, auth.tenant_id)?;
            let ticket = visible_ticket(conn, &auth, &settings, id)?;
            service::mark_read(conn, &ticket)
        })
        .await?;
    emit(
        &state,
        SocketEvent::new(ticket.tenant_id, EventKind::TicketUpdate, &ticket),
    );
    Ok(Json(ticket))
}

pub async fn list_ticket_logs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TicketLog>>> {
    let logs = state
        .run_db(move |conn| {
            let settings = load_settings(conn, auth.tenant_id)?;
            let ticket = visible_ticket(conn, &auth, &settings, id)?;
            Ok(service::list_logs(conn, &ticket)?)
        })
        .await?;
    Ok(Json(logs))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route(
            "/api/tickets/{id}",
            get(get_ticket).put(update_ticket).delete(delete_ticket),
        )
        .route("/api/tickets/{id}/read", put(mark_ticket_read))
        .route("/api/tickets/{id}/logs", get(list_ticket_logs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_list() {
        let statuses: Vec<TicketStatus> = parse_list(Some("open, pending")).unwrap();
        assert_eq!(statuses, vec![TicketStatus::Open, TicketStatus::Pending]);
        let empty: Vec<TicketStatus> = parse_list(None).unwrap();
        assert!(empty.is_empty());
        assert!(parse_list::<TicketStatus>(Some("open,archived")).is_err());
    }

    #[test]
    fn test_update_request_distinguishes_null() {
        let req: UpdateTicketRequest =
            serde_json::from_str(r#"{"status":"pending","user_id":null}"#).unwrap();
        let change: TicketChange = req.into();
        assert_eq!(change.status, Some(TicketStatus::Pending));
        assert_eq!(change.user_id, Some(None));
        assert_eq!(change.queue_id, None);
    }

    #[test]
    fn test_assigned_targets_only_names_explicit_ids() {
        let user = Uuid::new_v4();
        let queue = Uuid::new_v4();
        let req: UpdateTicketRequest = serde_json::from_value(serde_json::json!({
            "user_id": user,
            "queue_id": queue,
        }))
        .unwrap();
        assert_eq!(req.assigned_targets(), (Some(queue), Some(user)));

        let req: UpdateTicketRequest =
            serde_json::from_str(r#"{"user_id":null,"queue_id":null}"#).unwrap();
        assert_eq!(req.assigned_targets(), (None, None));
        assert_eq!(UpdateTicketRequest::default().assigned_targets(), (None, None));
    }
}
