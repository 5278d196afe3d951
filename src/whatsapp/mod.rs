//! Channel connections ("whatsapps") and the WhatsApp Cloud API webhook.

pub mod webhook;

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
use crate::channels::ChannelType;
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::{tenants, whatsapps};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::double_option;
use crate::realtime::{emit, EventKind, SocketEvent};

pub use webhook::configure_webhook_routes;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = whatsapps)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Whatsapp {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub channel: String,
    pub status: String,
    pub phone_number: Option<String>,
    pub phone_number_id: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub verify_token: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    pub farewell_message: Option<String>,
    pub chat_flow_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Whatsapp {
    pub fn channel_type(&self) -> Option<ChannelType> {
        self.channel.parse().ok()
    }

    fn derive_status(&self) -> &'static str {
        let configured = self.phone_number_id.as_deref().is_some_and(|s| !s.is_empty())
            && self.access_token.as_deref().is_some_and(|s| !s.is_empty());
        if self.is_active && configured {
            "CONNECTED"
        } else {
            "DISCONNECTED"
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateWhatsappRequest {
    pub name: String,
    pub channel: Option<String>,
    pub phone_number: Option<String>,
    pub phone_number_id: Option<String>,
    pub access_token: Option<String>,
    pub verify_token: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    pub farewell_message: Option<String>,
    pub chat_flow_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = whatsapps)]
pub struct UpdateWhatsappRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone_number_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub access_token: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub verify_token: Option<Option<String>>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub farewell_message: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub chat_flow_id: Option<Option<Uuid>>,
    #[serde(skip)]
    pub status: Option<String>,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn find_connection(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> AppResult<Whatsapp> {
    whatsapps::table
        .filter(whatsapps::id.eq(id))
        .filter(whatsapps::tenant_id.eq(tenant_id))
        .select(Whatsapp::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ERR_NO_WAPP_FOUND"))
}

fn clear_other_defaults(conn: &mut PgConnection, tenant_id: Uuid, keep: Uuid) -> QueryResult<usize> {
    diesel::update(
        whatsapps::table
            .filter(whatsapps::tenant_id.eq(tenant_id))
            .filter(whatsapps::id.ne(keep))
            .filter(whatsapps::is_default.eq(true)),
    )
    .set(whatsapps::is_default.eq(false))
    .execute(conn)
}

pub async fn list_whatsapps(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Whatsapp>>> {
    let rows = state
        .run_db(move |conn| {
            Ok(whatsapps::table
                .filter(whatsapps::tenant_id.eq(auth.tenant_id))
                .order(whatsapps::name.asc())
                .select(Whatsapp::as_select())
                .load(conn)?)
        })
        .await?;
    Ok(Json(rows))
}

pub async fn get_whatsapp(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Whatsapp>> {
    let tenant_id = auth.tenant_id;
    let whatsapp = state
        .run_db(move |conn| find_connection(conn, tenant_id, id))
        .await?;
    Ok(Json(whatsapp))
}

pub async fn create_whatsapp(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateWhatsappRequest>,
) -> AppResult<Json<Whatsapp>> {
    auth.require_admin()?;
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("ERR_INVALID_WAPP"));
    }
    let channel: ChannelType = req
        .channel
        .as_deref()
        .unwrap_or("waba")
        .parse()
        .map_err(|_| AppError::bad_request("ERR_INVALID_CHANNEL"))?;

    let tenant_id = auth.tenant_id;
    let whatsapp = state
        .run_db(move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let max_connections: i32 = tenants::table
                    .find(tenant_id)
                    .select(tenants::max_connections)
                    .first(conn)?;
                let current: i64 = whatsapps::table
                    .filter(whatsapps::tenant_id.eq(tenant_id))
                    .count()
                    .get_result(conn)?;
                if current >= i64::from(max_connections) {
                    return Err(AppError::forbidden("ERR_NO_PERMISSION_CONNECTIONS_LIMIT"));
                }

                let now = Utc::now();
                let mut whatsapp = Whatsapp {
                    id: Uuid::new_v4(),
                    tenant_id,
                    name: req.name.trim().to_string(),
                    channel: channel.to_string(),
                    status: String::new(),
                    phone_number: req.phone_number,
                    phone_number_id: req.phone_number_id,
                    access_token: req.access_token,
                    verify_token: req.verify_token,
                    // the first connection of a tenant is its default
                    is_default: req.is_default || current == 0,
                    is_active: true,
                    farewell_message: req.farewell_message,
                    chat_flow_id: req.chat_flow_id,
                    created_at: now,
                    updated_at: now,
                };
                whatsapp.status = whatsapp.derive_status().to_string();

                diesel::insert_into(whatsapps::table)
                    .values(&whatsapp)
                    .execute(conn)?;
                if whatsapp.is_default {
                    clear_other_defaults(conn, tenant_id, whatsapp.id)?;
                }
                Ok(whatsapp)
            })
        })
        .await?;

    info!("Connection {} ({}) created", whatsapp.id, whatsapp.channel);
    emit(
        &state,
        SocketEvent::new(tenant_id, EventKind::WhatsappUpdate, &whatsapp),
    );
    Ok(Json(whatsapp))
}

pub async fn update_whatsapp(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(mut req): Json<UpdateWhatsappRequest>,
) -> AppResult<Json<Whatsapp>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    let whatsapp = state
        .run_db(move |conn| {
            find_connection(conn, tenant_id, id)?;
            conn.transaction::<_, AppError, _>(|conn| {
                req.updated_at = Some(Utc::now());
                let updated: Whatsapp = diesel::update(whatsapps::table.find(id))
                    .set(&req)
                    .returning(Whatsapp::as_returning())
                    .get_result(conn)?;
                if updated.is_default {
                    clear_other_defaults(conn, tenant_id, id)?;
                }

                let status = updated.derive_status();
                if updated.status == status {
                    return Ok(updated);
                }
                Ok(diesel::update(whatsapps::table.find(id))
                    .set(whatsapps::status.eq(status))
                    .returning(Whatsapp::as_returning())
                    .get_result(conn)?)
            })
        })
        .await?;

    emit(
        &state,
        SocketEvent::new(tenant_id, EventKind::WhatsappUpdate, &whatsapp),
    );
    Ok(Json(whatsapp))
}

pub async fn delete_whatsapp(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    state
        .run_db(move |conn| {
            find_connection(conn, tenant_id, id)?;
            diesel::delete(whatsapps::table.find(id)).execute(conn)?;
            Ok(())
        })
        .await?;
    info!("Connection {id} deleted");
    emit(
        &state,
        SocketEvent::new(
            tenant_id,
            EventKind::WhatsappUpdate,
            serde_json::json!({ "action": "delete", "id": id }),
        ),
    );
    Ok(Json(serde_json::json!({ "message": "Connection deleted" })))
}

pub fn configure_whatsapp_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/whatsapp", get(list_whatsapps).post(create_whatsapp))
        .route(
            "/api/whatsapp/{id}",
            get(get_whatsapp)
                .put(update_whatsapp)
                .delete(delete_whatsapp),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn connection() -> Whatsapp {
        let now = Utc::now();
        Whatsapp {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Main".into(),
            channel: "waba".into(),
            status: "DISCONNECTED".into(),
            phone_number: None,
            phone_number_id: Some("1234".into()),
            access_token: Some("token".into()),
            verify_token: Some("verify".into()),
            is_default: true,
            is_active: true,
            farewell_message: None,
            chat_flow_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_follows_credentials() {
        let mut wa = connection();
        assert_eq!(wa.derive_status(), "CONNECTED");
        wa.access_token = Some(String::new());
        assert_eq!(wa.derive_status(), "DISCONNECTED");
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let json = serde_json::to_value(connection()).unwrap();
        assert!(json.get("access_token").is_none());
        assert!(json.get("verify_token").is_none());
        assert_eq!(json["channel"], "waba");
    }

    #[test]
    fn test_update_can_clear_farewell() {
        let req: UpdateWhatsappRequest =
            serde_json::from_str(r#"{"farewell_message": null}"#).unwrap();
        assert_eq!(req.farewell_message, Some(None));
        assert!(req.name.is_none());
    }
}
