use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::fast_replies;
use crate::core::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = fast_replies)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FastReply {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub key: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct FastReplyRequest {
    pub key: String,
    pub message: String,
}

impl FastReplyRequest {
    fn validate(&self) -> AppResult<()> {
        if self.key.trim().is_empty() || self.message.trim().is_empty() {
            return Err(AppError::bad_request("ERR_INVALID_FAST_REPLY"));
        }
        Ok(())
    }
}

pub async fn list_fast_replies(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Vec<FastReply>>> {
    let rows = state
        .run_db(move |conn| {
            Ok(fast_replies::table
                .filter(fast_replies::tenant_id.eq(auth.tenant_id))
                .order(fast_replies::key.asc())
                .select(FastReply::as_select())
                .load(conn)?)
        })
        .await?;
    Ok(Json(rows))
}

pub async fn create_fast_reply(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<FastReplyRequest>,
) -> AppResult<Json<FastReply>> {
    req.validate()?;
    let now = Utc::now();
    let reply = FastReply {
        id: Uuid::new_v4(),
        tenant_id: auth.tenant_id,
        user_id: Some(auth.user_id),
        key: req.key.trim().to_string(),
        message: req.message,
        created_at: now,
        updated_at: now,
    };
    let reply = state
        .run_db(move |conn| {
            diesel::insert_into(fast_replies::table)
                .values(&reply)
                .execute(conn)?;
            Ok(reply)
        })
        .await?;
    Ok(Json(reply))
}

pub async fn update_fast_reply(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<FastReplyRequest>,
) -> AppResult<Json<FastReply>> {
    req.validate()?;
    let reply = state
        .run_db(move |conn| {
            diesel::update(
                fast_replies::table
                    .filter(fast_replies::id.eq(id))
                    .filter(fast_replies::tenant_id.eq(auth.tenant_id)),
            )
            .set((
                fast_replies::key.eq(req.key.trim()),
                fast_replies::message.eq(&req.message),
                fast_replies::updated_at.eq(Utc::now()),
            ))
            .returning(FastReply::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("ERR_NO_FAST_REPLY_FOUND"))
        })
        .await?;
    Ok(Json(reply))
}

pub async fn delete_fast_reply(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let deleted = state
        .run_db(move |conn| {
            Ok(diesel::delete(
                fast_replies::table
                    .filter(fast_replies::id.eq(id))
                    .filter(fast_replies::tenant_id.eq(auth.tenant_id)),
            )
            .execute(conn)?)
        })
        .await?;
    if deleted == 0 {
        return Err(AppError::not_found("ERR_NO_FAST_REPLY_FOUND"));
    }
    Ok(Json(serde_json::json!({ "message": "Fast reply deleted" })))
}

pub fn configure_fast_replies_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/fast-replies",
            get(list_fast_replies).post(create_fast_reply),
        )
        .route(
            "/api/fast-replies/{id}",
            put(update_fast_reply).delete(delete_fast_reply),
        )
}
