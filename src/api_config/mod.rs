//! Credentials for external systems sending messages through a connection,
//! and the endpoint they call.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{extract_bearer_token, AuthUser, ERR_SESSION_EXPIRED};
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::{api_configs, api_messages};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{generate_token, hash_token, normalize_number};
use crate::whatsapp::find_connection;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = api_configs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ApiConfig {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub session_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub url_message_status: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = api_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ApiMessage {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub api_config_id: Uuid,
    pub session_id: Uuid,
    pub number: String,
    pub body: String,
    pub external_key: Option<String>,
    pub external_id: Option<String>,
    pub ack: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ApiConfigRequest {
    pub name: String,
    pub session_id: Uuid,
    pub url_message_status: Option<String>,
    pub is_active: Option<bool>,
}

/// Returned on create and renew, the only time the plain token is visible.
#[derive(Debug, Serialize)]
pub struct ApiConfigWithToken {
    #[serde(flatten)]
    pub config: ApiConfig,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ExternalMessageRequest {
    pub number: String,
    pub body: String,
    pub external_key: Option<String>,
}

fn find_api_config(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> AppResult<ApiConfig> {
    api_configs::table
        .filter(api_configs::id.eq(id))
        .filter(api_configs::tenant_id.eq(tenant_id))
        .select(ApiConfig::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ERR_API_CONFIG_NOT_FOUND"))
}

/// Checks a presented token against the stored hash of an active config.
pub fn token_matches(config: &ApiConfig, token: &str) -> bool {
    config.is_active && hash_token(token) == config.token_hash
}

pub async fn list_api_configs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Vec<ApiConfig>>> {
    auth.require_admin()?;
    let rows = state
        .run_db(move |conn| {
            Ok(api_configs::table
                .filter(api_configs::tenant_id.eq(auth.tenant_id))
                .order(api_configs::name.asc())
                .select(ApiConfig::as_select())
                .load(conn)?)
        })
        .await?;
    Ok(Json(rows))
}

pub async fn create_api_config(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<ApiConfigRequest>,
) -> AppResult<Json<ApiConfigWithToken>> {
    auth.require_admin()?;
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("ERR_INVALID_API_CONFIG"));
    }

    let token = generate_token();
    let now = Utc::now();
    let config = ApiConfig {
        id: Uuid::new_v4(),
        tenant_id: auth.tenant_id,
        session_id: req.session_id,
        user_id: Some(auth.user_id),
        name: req.name.trim().to_string(),
        token_hash: hash_token(&token),
        url_message_status: req.url_message_status,
        is_active: req.is_active.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };
    let config = state
        .run_db(move |conn| {
            find_connection(conn, config.tenant_id, config.session_id)?;
            diesel::insert_into(api_configs::table)
                .values(&config)
                .execute(conn)?;
            Ok(config)
        })
        .await?;
    info!("API config {} created", config.id);
    Ok(Json(ApiConfigWithToken { config, token }))
}

pub async fn update_api_config(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ApiConfigRequest>,
) -> AppResult<Json<ApiConfig>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    let config = state
        .run_db(move |conn| {
            let current = find_api_config(conn, tenant_id, id)?;
            find_connection(conn, tenant_id, req.session_id)?;

            Ok(diesel::update(api_configs::table.find(id))
                .set((
                    api_configs::name.eq(req.name.trim()),
                    api_configs::session_id.eq(req.session_id),
                    api_configs::url_message_status.eq(req.url_message_status),
                    api_configs::is_active.eq(req.is_active.unwrap_or(current.is_active)),
                    api_configs::updated_at.eq(Utc::now()),
                ))
                .returning(ApiConfig::as_returning())
                .get_result(conn)?)
        })
        .await?;
    Ok(Json(config))
}

pub async fn renew_api_token(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiConfigWithToken>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    let token = generate_token();
    let token_hash = hash_token(&token);
    let config = state
        .run_db(move |conn| {
            find_api_config(conn, tenant_id, id)?;
            Ok(diesel::update(api_configs::table.find(id))
                .set((
                    api_configs::token_hash.eq(token_hash),
                    api_configs::updated_at.eq(Utc::now()),
                ))
                .returning(ApiConfig::as_returning())
                .get_result(conn)?)
        })
        .await?;
    info!("API token renewed for config {id}");
    Ok(Json(ApiConfigWithToken { config, token }))
}

pub async fn delete_api_config(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    state
        .run_db(move |conn| {
            find_api_config(conn, tenant_id, id)?;
            diesel::delete(api_configs::table.find(id)).execute(conn)?;
            Ok(())
        })
        .await?;
    Ok(Json(serde_json::json!({ "message": "API config deleted" })))
}

/// External send. Authenticated by the config's own token, not a user session.
pub async fn send_external_message(
    State(state): State<Arc<AppState>>,
    Path(api_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ExternalMessageRequest>,
) -> AppResult<Json<ApiMessage>> {
    let token = extract_bearer_token(&headers)
        .ok_or_else(|| AppError::Unauthorized(ERR_SESSION_EXPIRED.to_string()))?
        .to_string();

    let config: ApiConfig = state
        .run_db(move |conn| {
            Ok(api_configs::table
                .find(api_id)
                .select(ApiConfig::as_select())
                .first(conn)
                .optional()?)
        })
        .await?
        .filter(|c| token_matches(c, &token))
        .ok_or_else(|| AppError::Unauthorized("ERR_INVALID_API_TOKEN".to_string()))?;

    let number = normalize_number(&req.number);
    if number.is_empty() || req.body.trim().is_empty() {
        return Err(AppError::bad_request("ERR_INVALID_API_MESSAGE"));
    }
    let (tenant_id, session_id) = (config.tenant_id, config.session_id);
    let connection = state
        .run_db(move |conn| find_connection(conn, tenant_id, session_id))
        .await?;
    let sent = state
        .channels
        .send_text(&connection, &number, &req.body)
        .await?;

    let message = ApiMessage {
        id: Uuid::new_v4(),
        tenant_id: config.tenant_id,
        api_config_id: config.id,
        session_id: config.session_id,
        number,
        body: req.body,
        external_key: req.external_key,
        external_id: sent.external_id,
        ack: 1,
        created_at: Utc::now(),
    };
    let message = state
        .run_db(move |conn| {
            diesel::insert_into(api_messages::table)
                .values(&message)
                .execute(conn)?;
            Ok(message)
        })
        .await?;
    info!("API message {} sent via config {}", message.id, config.id);
    Ok(Json(message))
}

pub fn configure_api_config_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/api-config", get(list_api_configs).post(create_api_config))
        .route(
            "/api/api-config/{id}",
            put(update_api_config).delete(delete_api_config),
        )
        .route("/api/api-config/{id}/renew-token", post(renew_api_token))
        .route("/v1/api/external/{api_id}", post(send_external_message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: &str) -> ApiConfig {
        let now = Utc::now();
        ApiConfig {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            user_id: None,
            name: "erp".into(),
            token_hash: hash_token(token),
            url_message_status: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_token_matching() {
        let token = generate_token();
        let mut cfg = config(&token);
        assert!(token_matches(&cfg, &token));
        assert!(!token_matches(&cfg, "wrong"));
        cfg.is_active = false;
        assert!(!token_matches(&cfg, &token));
    }

    #[test]
    fn test_token_hash_is_not_serialized() {
        let json = serde_json::to_value(config("secret")).unwrap();
        assert!(json.get("token_hash").is_none());
    }
}
