//! Tenants (customer organisations) and their business hours.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::tenants;
use crate::core::shared::state::AppState;
use crate::settings::seed_default_settings;
use crate::users::{insert_user, CreateUserRequest, Profile, UserView};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = tenants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub owner_id: Option<Uuid>,
    pub max_users: i32,
    pub max_connections: i32,
    pub business_hours: serde_json::Value,
    pub message_business_hours: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayType {
    /// Open all day
    #[serde(rename = "O")]
    Open,
    /// Closed all day
    #[serde(rename = "C")]
    Closed,
    /// Open in the configured ranges
    #[serde(rename = "H")]
    Hours,
}

/// One weekday entry; `day` counts from Sunday = 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub day: u32,
    #[serde(rename = "type")]
    pub day_type: DayType,
    #[serde(default)]
    pub hr1: String,
    #[serde(default)]
    pub hr2: String,
    #[serde(default)]
    pub hr3: String,
    #[serde(default)]
    pub hr4: String,
}

pub fn default_business_hours() -> Vec<DayHours> {
    (0..7)
        .map(|day| DayHours {
            day,
            day_type: DayType::Open,
            hr1: "08:00".to_string(),
            hr2: "12:00".to_string(),
            hr3: "14:00".to_string(),
            hr4: "18:00".to_string(),
        })
        .collect()
}

pub fn parse_business_hours(value: &serde_json::Value) -> Vec<DayHours> {
    serde_json::from_value(value.clone()).unwrap_or_else(|e| {
        warn!("Ignoring malformed business hours: {e}");
        Vec::new()
    })
}

fn in_range(time: NaiveTime, start: &str, end: &str) -> bool {
    let (Ok(start), Ok(end)) = (
        NaiveTime::parse_from_str(start, "%H:%M"),
        NaiveTime::parse_from_str(end, "%H:%M"),
    ) else {
        return false;
    };
    start <= time && time < end
}

/// Whether `now` falls inside the configured hours. Days without an entry count as open.
pub fn is_within_business_hours(hours: &[DayHours], now: NaiveDateTime) -> bool {
    let weekday = now.weekday().num_days_from_sunday();
    let Some(entry) = hours.iter().find(|h| h.day == weekday) else {
        return true;
    };
    match entry.day_type {
        DayType::Open => true,
        DayType::Closed => false,
        DayType::Hours => {
            let time = now.time();
            in_range(time, &entry.hr1, &entry.hr2) || in_range(time, &entry.hr3, &entry.hr4)
        }
    }
}

impl Tenant {
    pub fn hours(&self) -> Vec<DayHours> {
        parse_business_hours(&self.business_hours)
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

pub fn find_tenant(conn: &mut PgConnection, id: Uuid) -> AppResult<Tenant> {
    tenants::table
        .find(id)
        .select(Tenant::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ERR_NO_TENANT_FOUND"))
}

#[derive(Debug, Deserialize)]
pub struct InitialAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub max_users: Option<i32>,
    pub max_connections: Option<i32>,
    pub admin: Option<InitialAdmin>,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = tenants)]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub status: Option<String>,
    pub max_users: Option<i32>,
    pub max_connections: Option<i32>,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CreatedTenant {
    pub tenant: Tenant,
    pub admin: Option<UserView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BusinessHoursPayload {
    pub business_hours: Vec<DayHours>,
    pub message_business_hours: Option<String>,
}

pub async fn list_tenants(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Tenant>>> {
    auth.require_super()?;
    let rows = state
        .run_db(|conn| {
            Ok(tenants::table
                .order(tenants::name.asc())
                .select(Tenant::as_select())
                .load(conn)?)
        })
        .await?;
    Ok(Json(rows))
}

pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateTenantRequest>,
) -> AppResult<Json<CreatedTenant>> {
    auth.require_super()?;
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("ERR_INVALID_TENANT"));
    }

    let now = Utc::now();
    let tenant = Tenant {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        status: "active".to_string(),
        owner_id: None,
        max_users: req.max_users.unwrap_or(5),
        max_connections: req.max_connections.unwrap_or(1),
        business_hours: serde_json::to_value(default_business_hours())
            .unwrap_or_else(|_| serde_json::json!([])),
        message_business_hours: None,
        created_at: now,
        updated_at: now,
    };

    let created = state
        .run_db(move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                diesel::insert_into(tenants::table)
                    .values(&tenant)
                    .execute(conn)?;
                seed_default_settings(conn, tenant.id)?;

                let Some(admin) = req.admin else {
                    return Ok(CreatedTenant {
                        tenant: tenant.clone(),
                        admin: None,
                    });
                };
                let user = insert_user(
                    conn,
                    tenant.id,
                    CreateUserRequest {
                        name: admin.name,
                        email: admin.email,
                        password: admin.password,
                        profile: Some(Profile::Admin),
                        queue_ids: Vec::new(),
                    },
                )?;
                let tenant: Tenant = diesel::update(tenants::table.find(tenant.id))
                    .set(tenants::owner_id.eq(Some(user.id)))
                    .returning(Tenant::as_returning())
                    .get_result(conn)?;
                Ok(CreatedTenant {
                    tenant,
                    admin: Some(user.into()),
                })
            })
        })
        .await?;

    info!("Tenant {} created", created.tenant.id);
    Ok(Json(created))
}

pub async fn update_tenant(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(mut req): Json<UpdateTenantRequest>,
) -> AppResult<Json<Tenant>> {
    auth.require_super()?;
    if let Some(status) = &req.status {
        if status != "active" && status != "inactive" {
            return Err(AppError::bad_request("ERR_INVALID_TENANT_STATUS"));
        }
    }
    req.updated_at = Some(Utc::now());

    let tenant = state
        .run_db(move |conn| {
            find_tenant(conn, id)?;
            Ok(diesel::update(tenants::table.find(id))
                .set(&req)
                .returning(Tenant::as_returning())
                .get_result(conn)?)
        })
        .await?;
    Ok(Json(tenant))
}

pub async fn delete_tenant(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_super()?;
    if id == auth.tenant_id {
        return Err(AppError::bad_request("ERR_CANNOT_DELETE_OWN_TENANT"));
    }
    let deleted = state
        .run_db(move |conn| Ok(diesel::delete(tenants::table.find(id)).execute(conn)?))
        .await?;
    if deleted == 0 {
        return Err(AppError::not_found("ERR_NO_TENANT_FOUND"));
    }
    info!("Tenant {id} deleted");
    Ok(Json(serde_json::json!({ "message": "Tenant deleted" })))
}

pub async fn get_business_hours(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<BusinessHoursPayload>> {
    let tenant_id = auth.tenant_id;
    let tenant = state
        .run_db(move |conn| find_tenant(conn, tenant_id))
        .await?;
    Ok(Json(BusinessHoursPayload {
        business_hours: tenant.hours(),
        message_business_hours: tenant.message_business_hours,
    }))
}

pub async fn update_business_hours(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<BusinessHoursPayload>,
) -> AppResult<Json<BusinessHoursPayload>> {
    auth.require_admin()?;
    if req.business_hours.iter().any(|h| h.day > 6) {
        return Err(AppError::bad_request("ERR_INVALID_BUSINESS_HOURS"));
    }
    let value = serde_json::to_value(&req.business_hours)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let tenant_id = auth.tenant_id;
    let message = req.message_business_hours;
    let tenant: Tenant = state
        .run_db(move |conn| {
            Ok(diesel::update(tenants::table.find(tenant_id))
                .set((
                    tenants::business_hours.eq(value),
                    tenants::message_business_hours.eq(message),
                    tenants::updated_at.eq(Utc::now()),
                ))
                .returning(Tenant::as_returning())
                .get_result(conn)?)
        })
        .await?;

    Ok(Json(BusinessHoursPayload {
        business_hours: tenant.hours(),
        message_business_hours: tenant.message_business_hours,
    }))
}

pub fn configure_tenants_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/admin/tenants", get(list_tenants).post(create_tenant))
        .route(
            "/api/admin/tenants/{id}",
            axum::routing::put(update_tenant).delete(delete_tenant),
        )
        .route(
            "/api/tenants/business-hours",
            get(get_business_hours).put(update_business_hours),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn day(day: u32, day_type: DayType) -> DayHours {
        DayHours {
            day,
            day_type,
            hr1: "08:00".into(),
            hr2: "12:00".into(),
            hr3: "13:00".into(),
            hr4: "18:00".into(),
        }
    }

    #[test]
    fn test_hours_ranges() {
        // 2024-06-03 is a Monday
        let hours = vec![day(1, DayType::Hours)];
        assert!(is_within_business_hours(&hours, at(2024, 6, 3, 9, 0)));
        assert!(!is_within_business_hours(&hours, at(2024, 6, 3, 12, 30)));
        assert!(is_within_business_hours(&hours, at(2024, 6, 3, 13, 0)));
        assert!(!is_within_business_hours(&hours, at(2024, 6, 3, 18, 0)));
    }

    #[test]
    fn test_open_and_closed_days() {
        let hours = vec![day(0, DayType::Closed), day(6, DayType::Open)];
        assert!(!is_within_business_hours(&hours, at(2024, 6, 2, 10, 0)));
        assert!(is_within_business_hours(&hours, at(2024, 6, 1, 3, 0)));
        // no entry for Monday
        assert!(is_within_business_hours(&hours, at(2024, 6, 3, 3, 0)));
    }

    #[test]
    fn test_parse_wire_shape() {
        let value = serde_json::json!([
            {"day": 2, "type": "H", "hr1": "09:00", "hr2": "17:00", "hr3": "", "hr4": ""}
        ]);
        let hours = parse_business_hours(&value);
        assert_eq!(hours.len(), 1);
        assert_eq!(hours[0].day_type, DayType::Hours);
        assert!(parse_business_hours(&serde_json::json!({"bad": true})).is_empty());
    }

    #[test]
    fn test_default_hours_cover_the_week() {
        let hours = default_business_hours();
        assert_eq!(hours.len(), 7);
        assert!(hours.iter().all(|h| h.day_type == DayType::Open));
    }
}
