//! Per-tenant key/value settings and their typed view.

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::settings;
use crate::core::shared::state::AppState;

pub const USER_CREATION: &str = "userCreation";
pub const DIRECT_TICKETS_TO_WALLETS: &str = "DirectTicketsToWallets";
pub const NOT_VIEW_ASSIGNED_TICKETS: &str = "NotViewAssignedTickets";
pub const NOT_VIEW_TICKETS_QUEUE_UNDEFINED: &str = "NotViewTicketsQueueUndefined";
pub const NOT_VIEW_TICKETS_CHAT_BOT: &str = "NotViewTicketsChatBot";
pub const BOT_TICKET_ACTIVE: &str = "botTicketActive";
pub const IGNORE_GROUP_MSG: &str = "ignoreGroupMsg";
pub const AUTO_CLOSE_TICKETS_DAYS: &str = "autoCloseTicketsDays";
pub const AUTO_CLOSE_OPEN_TICKETS: &str = "autoCloseOpenTickets";

/// Longest inactivity window auto-close accepts.
pub const MAX_AUTO_CLOSE_DAYS: i64 = 3650;

pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    (USER_CREATION, "enabled"),
    (DIRECT_TICKETS_TO_WALLETS, "disabled"),
    (NOT_VIEW_ASSIGNED_TICKETS, "disabled"),
    (NOT_VIEW_TICKETS_QUEUE_UNDEFINED, "disabled"),
    (NOT_VIEW_TICKETS_CHAT_BOT, "disabled"),
    (BOT_TICKET_ACTIVE, ""),
    (IGNORE_GROUP_MSG, "disabled"),
    (AUTO_CLOSE_TICKETS_DAYS, "0"),
    (AUTO_CLOSE_OPEN_TICKETS, "disabled"),
];

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = settings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Setting {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Settings that drive ticket routing, parsed once per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSettings {
    pub user_creation: bool,
    pub direct_tickets_to_wallets: bool,
    pub not_view_assigned_tickets: bool,
    pub not_view_tickets_queue_undefined: bool,
    pub not_view_tickets_chat_bot: bool,
    pub bot_ticket_active: Option<Uuid>,
    pub ignore_group_msg: bool,
    pub auto_close_tickets_days: i64,
    pub auto_close_open_tickets: bool,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_SETTINGS.iter().map(|(k, v)| (*k, *v)))
    }
}

fn enabled(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v.eq_ignore_ascii_case("enabled"))
}

impl TenantSettings {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let map: HashMap<&str, &str> = pairs.into_iter().collect();
        let get = |key: &str| map.get(key).copied();

        Self {
            user_creation: enabled(get(USER_CREATION)),
            direct_tickets_to_wallets: enabled(get(DIRECT_TICKETS_TO_WALLETS)),
            not_view_assigned_tickets: enabled(get(NOT_VIEW_ASSIGNED_TICKETS)),
            not_view_tickets_queue_undefined: enabled(get(NOT_VIEW_TICKETS_QUEUE_UNDEFINED)),
            not_view_tickets_chat_bot: enabled(get(NOT_VIEW_TICKETS_CHAT_BOT)),
            bot_ticket_active: get(BOT_TICKET_ACTIVE).and_then(|v| Uuid::parse_str(v.trim()).ok()),
            ignore_group_msg: enabled(get(IGNORE_GROUP_MSG)),
            auto_close_tickets_days: get(AUTO_CLOSE_TICKETS_DAYS)
                .and_then(parse_auto_close_days)
                .unwrap_or(0),
            auto_close_open_tickets: enabled(get(AUTO_CLOSE_OPEN_TICKETS)),
        }
    }

    pub fn from_rows(rows: &[Setting]) -> Self {
        Self::from_pairs(rows.iter().map(|s| (s.key.as_str(), s.value.as_str())))
    }
}

fn parse_auto_close_days(value: &str) -> Option<i64> {
    value
        .trim()
        .parse()
        .ok()
        .filter(|days| (0..=MAX_AUTO_CLOSE_DAYS).contains(days))
}

/// Rejects values the typed view could not use.
pub fn validate_setting(key: &str, value: &str) -> AppResult<()> {
    let valid = match key {
        AUTO_CLOSE_TICKETS_DAYS => parse_auto_close_days(value).is_some(),
        BOT_TICKET_ACTIVE => value.trim().is_empty() || Uuid::parse_str(value.trim()).is_ok(),
        USER_CREATION
        | DIRECT_TICKETS_TO_WALLETS
        | NOT_VIEW_ASSIGNED_TICKETS
        | NOT_VIEW_TICKETS_QUEUE_UNDEFINED
        | NOT_VIEW_TICKETS_CHAT_BOT
        | IGNORE_GROUP_MSG
        | AUTO_CLOSE_OPEN_TICKETS => {
            let v = value.trim();
            v.eq_ignore_ascii_case("enabled") || v.eq_ignore_ascii_case("disabled")
        }
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::bad_request("ERR_INVALID_SETTING_VALUE"))
    }
}

pub fn seed_default_settings(conn: &mut PgConnection, tenant_id: Uuid) -> QueryResult<usize> {
    let now = Utc::now();
    let rows: Vec<Setting> = DEFAULT_SETTINGS
        .iter()
        .map(|(key, value)| Setting {
            id: Uuid::new_v4(),
            tenant_id,
            key: (*key).to_string(),
            value: (*value).to_string(),
            created_at: now,
            updated_at: now,
        })
        .collect();
    diesel::insert_into(settings::table)
        .values(&rows)
        .on_conflict((settings::tenant_id, settings::key))
        .do_nothing()
        .execute(conn)
}

pub fn load_settings(conn: &mut PgConnection, tenant_id: Uuid) -> QueryResult<TenantSettings> {
    let rows: Vec<Setting> = settings::table
        .filter(settings::tenant_id.eq(tenant_id))
        .select(Setting::as_select())
        .load(conn)?;
    if rows.is_empty() {
        debug!("Tenant {tenant_id} has no settings rows, using defaults");
        return Ok(TenantSettings::default());
    }
    Ok(TenantSettings::from_rows(&rows))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub value: String,
}

pub async fn list_settings(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Setting>>> {
    let tenant_id = auth.tenant_id;
    let rows = state
        .run_db(move |conn| {
            Ok(settings::table
                .filter(settings::tenant_id.eq(tenant_id))
                .order(settings::key.asc())
                .select(Setting::as_select())
                .load(conn)?)
        })
        .await?;
    Ok(Json(rows))
}

pub async fn update_setting(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(key): Path<String>,
    Json(req): Json<UpdateSettingRequest>,
) -> AppResult<Json<Setting>> {
    auth.require_admin()?;
    validate_setting(&key, &req.value)?;

    let tenant_id = auth.tenant_id;
    let setting = state
        .run_db(move |conn| {
            diesel::update(
                settings::table
                    .filter(settings::tenant_id.eq(tenant_id))
                    .filter(settings::key.eq(&key)),
            )
            .set((
                settings::value.eq(req.value.trim()),
                settings::updated_at.eq(Utc::now()),
            ))
            .returning(Setting::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("ERR_NO_SETTING_FOUND"))
        })
        .await?;

    info!("Setting {} updated in tenant {tenant_id}", setting.key);
    Ok(Json(setting))
}

pub fn configure_settings_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/settings", get(list_settings))
        .route("/api/settings/{key}", put(update_setting))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = TenantSettings::default();
        assert!(s.user_creation);
        assert!(!s.direct_tickets_to_wallets);
        assert_eq!(s.bot_ticket_active, None);
        assert_eq!(s.auto_close_tickets_days, 0);
    }

    #[test]
    fn test_parse_values() {
        let flow = Uuid::new_v4();
        let flow_str = flow.to_string();
        let s = TenantSettings::from_pairs([
            (DIRECT_TICKETS_TO_WALLETS, "enabled"),
            (BOT_TICKET_ACTIVE, flow_str.as_str()),
            (AUTO_CLOSE_TICKETS_DAYS, " 3 "),
            (IGNORE_GROUP_MSG, "Enabled"),
            (NOT_VIEW_ASSIGNED_TICKETS, "yes"),
        ]);
        assert!(s.direct_tickets_to_wallets);
        assert_eq!(s.bot_ticket_active, Some(flow));
        assert_eq!(s.auto_close_tickets_days, 3);
        assert!(s.ignore_group_msg);
        assert!(!s.not_view_assigned_tickets);
    }

    #[test]
    fn test_auto_close_days_out_of_range_disables() {
        let s = TenantSettings::from_pairs([(AUTO_CLOSE_TICKETS_DAYS, "9999999999999")]);
        assert_eq!(s.auto_close_tickets_days, 0);
        let s = TenantSettings::from_pairs([(AUTO_CLOSE_TICKETS_DAYS, "-2")]);
        assert_eq!(s.auto_close_tickets_days, 0);
    }

    #[test]
    fn test_validate_setting_values() {
        assert!(validate_setting(AUTO_CLOSE_TICKETS_DAYS, " 7 ").is_ok());
        assert!(validate_setting(AUTO_CLOSE_TICKETS_DAYS, "0").is_ok());
        assert!(validate_setting(AUTO_CLOSE_TICKETS_DAYS, "3650").is_ok());
        for bad in ["3651", "-1", "9999999999999", "soon"] {
            let err = validate_setting(AUTO_CLOSE_TICKETS_DAYS, bad).unwrap_err();
            assert_eq!(err.to_string(), "ERR_INVALID_SETTING_VALUE");
        }
        assert!(validate_setting(BOT_TICKET_ACTIVE, "").is_ok());
        assert!(validate_setting(BOT_TICKET_ACTIVE, &Uuid::new_v4().to_string()).is_ok());
        assert!(validate_setting(BOT_TICKET_ACTIVE, "flow-1").is_err());
        assert!(validate_setting(IGNORE_GROUP_MSG, "Enabled").is_ok());
        assert!(validate_setting(IGNORE_GROUP_MSG, "yes").is_err());
    }

    #[test]
    fn test_garbage_falls_back() {
        let s = TenantSettings::from_pairs([
            (BOT_TICKET_ACTIVE, "not-a-uuid"),
            (AUTO_CLOSE_TICKETS_DAYS, "x"),
        ]);
        assert_eq!(s.bot_ticket_active, None);
        assert_eq!(s.auto_close_tickets_days, 0);
    }
}
