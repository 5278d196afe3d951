use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{find_campaign, validate_start, Campaign, CampaignContact, CampaignStatus};
use crate::auth::AuthUser;
use crate::contacts::Contact;
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::{campaign_contacts, campaigns, contacts};
use crate::core::shared::state::AppState;
use crate::realtime::{emit, EventKind, SocketEvent};
use crate::whatsapp::find_connection;

const DEFAULT_DELAY_SECONDS: i32 = 20;

#[derive(Debug, Deserialize)]
pub struct CampaignRequest {
    pub name: String,
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub message1: String,
    #[serde(default)]
    pub message2: String,
    #[serde(default)]
    pub message3: String,
    pub media_url: Option<String>,
    pub session_id: Uuid,
    pub delay_seconds: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct AddContactsRequest {
    pub contact_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CampaignContactView {
    #[serde(flatten)]
    pub entry: CampaignContact,
    pub contact: Contact,
}

fn editable(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> AppResult<Campaign> {
    let campaign = find_campaign(conn, tenant_id, id)?;
    if !campaign.status().is_editable() {
        return Err(AppError::bad_request("ERR_CAMPAIGN_NOT_EDITABLE"));
    }
    Ok(campaign)
}

fn set_status(conn: &mut PgConnection, id: Uuid, status: CampaignStatus) -> QueryResult<Campaign> {
    diesel::update(campaigns::table.find(id))
        .set((
            campaigns::status.eq(status.as_str()),
            campaigns::updated_at.eq(Utc::now()),
        ))
        .returning(Campaign::as_returning())
        .get_result(conn)
}

fn announce(state: &AppState, campaign: &Campaign) {
    emit(
        state,
        SocketEvent::new(campaign.tenant_id, EventKind::CampaignUpdate, campaign),
    );
}

pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Campaign>>> {
    let rows = state
        .run_db(move |conn| {
            Ok(campaigns::table
                .filter(campaigns::tenant_id.eq(auth.tenant_id))
                .order(campaigns::start_at.desc())
                .select(Campaign::as_select())
                .load(conn)?)
        })
        .await?;
    Ok(Json(rows))
}

pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Campaign>> {
    let campaign = state
        .run_db(move |conn| find_campaign(conn, auth.tenant_id, id))
        .await?;
    Ok(Json(campaign))
}

pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CampaignRequest>,
) -> AppResult<Json<Campaign>> {
    auth.require_admin()?;
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("ERR_INVALID_CAMPAIGN"));
    }

    let now = Utc::now();
    let campaign = Campaign {
        id: Uuid::new_v4(),
        tenant_id: auth.tenant_id,
        name: req.name.trim().to_string(),
        status: CampaignStatus::Pending.as_str().to_string(),
        start_at: req.start_at,
        message1: req.message1,
        message2: req.message2,
        message3: req.message3,
        media_url: req.media_url,
        session_id: req.session_id,
        delay_seconds: req.delay_seconds.unwrap_or(DEFAULT_DELAY_SECONDS).max(0),
        user_id: Some(auth.user_id),
        created_at: now,
        updated_at: now,
    };
    let campaign = state
        .run_db(move |conn| {
            find_connection(conn, campaign.tenant_id, campaign.session_id)?;
            diesel::insert_into(campaigns::table)
                .values(&campaign)
                .execute(conn)?;
            Ok(campaign)
        })
        .await?;
    info!("Campaign {} created", campaign.id);
    Ok(Json(campaign))
}

pub async fn update_campaign(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<CampaignRequest>,
) -> AppResult<Json<Campaign>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    let campaign = state
        .run_db(move |conn| {
            let current = editable(conn, tenant_id, id)?;
            find_connection(conn, tenant_id, req.session_id)?;

            Ok(diesel::update(campaigns::table.find(id))
                .set((
                    campaigns::name.eq(req.name.trim()),
                    campaigns::start_at.eq(req.start_at),
                    campaigns::message1.eq(req.message1),
                    campaigns::message2.eq(req.message2),
                    campaigns::message3.eq(req.message3),
                    campaigns::media_url.eq(req.media_url),
                    campaigns::session_id.eq(req.session_id),
                    campaigns::delay_seconds
                        .eq(req.delay_seconds.unwrap_or(current.delay_seconds).max(0)),
                    campaigns::updated_at.eq(Utc::now()),
                ))
                .returning(Campaign::as_returning())
                .get_result(conn)?)
        })
        .await?;
    Ok(Json(campaign))
}

pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    state
        .run_db(move |conn| {
            editable(conn, tenant_id, id)?;
            diesel::delete(campaigns::table.find(id)).execute(conn)?;
            Ok(())
        })
        .await?;
    info!("Campaign {id} deleted");
    Ok(Json(serde_json::json!({ "message": "Campaign deleted" })))
}

pub async fn list_campaign_contacts(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<CampaignContactView>>> {
    let rows: Vec<(CampaignContact, Contact)> = state
        .run_db(move |conn| {
            find_campaign(conn, auth.tenant_id, id)?;
            Ok(campaign_contacts::table
                .inner_join(contacts::table)
                .filter(campaign_contacts::campaign_id.eq(id))
                .order(contacts::name.asc())
                .select((CampaignContact::as_select(), Contact::as_select()))
                .load(conn)?)
        })
        .await?;
    Ok(Json(
        rows.into_iter()
            .map(|(entry, contact)| CampaignContactView { entry, contact })
            .collect(),
    ))
}

pub async fn add_campaign_contacts(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AddContactsRequest>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    let added = state
        .run_db(move |conn| {
            editable(conn, tenant_id, id)?;

            // ids of other tenants are silently dropped
            let owned: Vec<Uuid> = contacts::table
                .filter(contacts::tenant_id.eq(tenant_id))
                .filter(contacts::id.eq_any(req.contact_ids))
                .filter(contacts::is_group.eq(false))
                .select(contacts::id)
                .load(conn)?;
            let now = Utc::now();
            let rows: Vec<CampaignContact> = owned
                .into_iter()
                .map(|contact_id| CampaignContact {
                    id: Uuid::new_v4(),
                    campaign_id: id,
                    contact_id,
                    ack: 0,
                    message_random: None,
                    body: None,
                    external_id: None,
                    sent_at: None,
                    created_at: now,
                })
                .collect();
            Ok(diesel::insert_into(campaign_contacts::table)
                .values(&rows)
                .on_conflict((campaign_contacts::campaign_id, campaign_contacts::contact_id))
                .do_nothing()
                .execute(conn)?)
        })
        .await?;
    Ok(Json(serde_json::json!({ "added": added })))
}

pub async fn remove_campaign_contact(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((id, contact_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    state
        .run_db(move |conn| {
            editable(conn, tenant_id, id)?;
            diesel::delete(
                campaign_contacts::table
                    .filter(campaign_contacts::campaign_id.eq(id))
                    .filter(campaign_contacts::contact_id.eq(contact_id)),
            )
            .execute(conn)?;
            Ok(())
        })
        .await?;
    Ok(Json(serde_json::json!({ "message": "Contact removed" })))
}

pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Campaign>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    let campaign = state
        .run_db(move |conn| {
            let campaign = find_campaign(conn, tenant_id, id)?;
            let contact_count: i64 = campaign_contacts::table
                .filter(campaign_contacts::campaign_id.eq(id))
                .count()
                .get_result(conn)?;
            validate_start(&campaign, contact_count, Utc::now())?;
            Ok(set_status(conn, id, CampaignStatus::Scheduled)?)
        })
        .await?;
    announce(&state, &campaign);
    info!("Campaign {id} scheduled for {}", campaign.start_at);
    Ok(Json(campaign))
}

pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Campaign>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    let campaign = state
        .run_db(move |conn| {
            let campaign = find_campaign(conn, tenant_id, id)?;
            if !matches!(
                campaign.status(),
                CampaignStatus::Scheduled | CampaignStatus::Processing
            ) {
                return Err(AppError::bad_request("ERR_CAMPAIGN_NOT_RUNNING"));
            }
            Ok(set_status(conn, id, CampaignStatus::Canceled)?)
        })
        .await?;
    announce(&state, &campaign);
    info!("Campaign {id} canceled");
    Ok(Json(campaign))
}

pub fn configure_campaigns_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/api/campaigns/{id}",
            get(get_campaign)
                .put(update_campaign)
                .delete(delete_campaign),
        )
        .route(
            "/api/campaigns/{id}/contacts",
            get(list_campaign_contacts).post(add_campaign_contacts),
        )
        .route(
            "/api/campaigns/{id}/contacts/{contact_id}",
            delete(remove_campaign_contact),
        )
        .route("/api/campaigns/{id}/start", post(start_campaign))
        .route("/api/campaigns/{id}/cancel", post(cancel_campaign))
}
