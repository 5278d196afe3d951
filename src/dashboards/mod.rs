//! Ticket indicators for the tenant dashboard.

pub mod storage;
pub mod types;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::core::error::AppResult;
use crate::core::shared::state::AppState;

pub use types::*;

pub async fn handle_tickets_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<Vec<StatusCount>>> {
    let range = query.resolve(Utc::now().date_naive())?;
    let tenant_id = auth.tenant_id;
    let rows = state
        .run_db(move |conn| Ok(storage::tickets_by_status(conn, tenant_id, range)?))
        .await?;
    Ok(Json(rows))
}

pub async fn handle_tickets_queues(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<Vec<QueueCount>>> {
    let range = query.resolve(Utc::now().date_naive())?;
    let tenant_id = auth.tenant_id;
    let rows = state
        .run_db(move |conn| Ok(storage::tickets_by_queue(conn, tenant_id, range)?))
        .await?;
    Ok(Json(rows))
}

pub async fn handle_tickets_users(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<Vec<UserCount>>> {
    let range = query.resolve(Utc::now().date_naive())?;
    let tenant_id = auth.tenant_id;
    let rows = state
        .run_db(move |conn| Ok(storage::tickets_by_user(conn, tenant_id, range)?))
        .await?;
    Ok(Json(rows))
}

pub async fn handle_tickets_per_day(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<Vec<DayCount>>> {
    let range = query.resolve(Utc::now().date_naive())?;
    let tenant_id = auth.tenant_id;
    let rows = state
        .run_db(move |conn| Ok(storage::tickets_per_day(conn, tenant_id, range)?))
        .await?;
    Ok(Json(rows))
}

pub fn configure_dashboards_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/dashboard/tickets-status", get(handle_tickets_status))
        .route("/api/dashboard/tickets-queues", get(handle_tickets_queues))
        .route("/api/dashboard/tickets-users", get(handle_tickets_users))
        .route("/api/dashboard/tickets-per-day", get(handle_tickets_per_day))
}
