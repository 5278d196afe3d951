use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::{queues, tickets};
use crate::core::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = queues)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Queue {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct QueueRequest {
    pub name: String,
    pub is_active: Option<bool>,
}

/// Checks that `queue_id` belongs to the tenant.
pub fn ensure_queue(conn: &mut PgConnection, tenant_id: Uuid, queue_id: Uuid) -> AppResult<Queue> {
    queues::table
        .filter(queues::id.eq(queue_id))
        .filter(queues::tenant_id.eq(tenant_id))
        .select(Queue::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ERR_QUEUE_NOT_FOUND"))
}

pub async fn list_queues(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Queue>>> {
    let tenant_id = auth.tenant_id;
    let rows = state
        .run_db(move |conn| {
            Ok(queues::table
                .filter(queues::tenant_id.eq(tenant_id))
                .order(queues::name.asc())
                .select(Queue::as_select())
                .load(conn)?)
        })
        .await?;
    Ok(Json(rows))
}

pub async fn create_queue(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<QueueRequest>,
) -> AppResult<Json<Queue>> {
    auth.require_admin()?;
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("ERR_INVALID_QUEUE"));
    }
    let now = Utc::now();
    let queue = Queue {
        id: Uuid::new_v4(),
        tenant_id: auth.tenant_id,
        name: req.name.trim().to_string(),
        is_active: req.is_active.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };
    let queue = state
        .run_db(move |conn| {
            diesel::insert_into(queues::table)
                .values(&queue)
                .execute(conn)?;
            Ok(queue)
        })
        .await?;
    Ok(Json(queue))
}

pub async fn update_queue(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<QueueRequest>,
) -> AppResult<Json<Queue>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    let queue = state
        .run_db(move |conn| {
            let current = ensure_queue(conn, tenant_id, id)?;
            Ok(diesel::update(queues::table.find(id))
                .set((
                    queues::name.eq(req.name.trim()),
                    queues::is_active.eq(req.is_active.unwrap_or(current.is_active)),
                    queues::updated_at.eq(Utc::now()),
                ))
                .returning(Queue::as_returning())
                .get_result(conn)?)
        })
        .await?;
    Ok(Json(queue))
}

pub async fn delete_queue(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    state
        .run_db(move |conn| {
            ensure_queue(conn, tenant_id, id)?;
            conn.transaction::<_, AppError, _>(|conn| {
                diesel::update(tickets::table.filter(tickets::queue_id.eq(id)))
                    .set(tickets::queue_id.eq(None::<Uuid>))
                    .execute(conn)?;
                diesel::delete(queues::table.find(id)).execute(conn)?;
                Ok(())
            })
        })
        .await?;

    info!("Queue {id} deleted from tenant {tenant_id}");
    Ok(Json(serde_json::json!({ "message": "Queue deleted" })))
}

pub fn configure_queues_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/queues", get(list_queues).post(create_queue))
        .route(
            "/api/queues/{id}",
            axum::routing::put(update_queue).delete(delete_queue),
        )
}
