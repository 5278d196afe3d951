use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use super::service;
use super::types::*;
use crate::auth::AuthUser;
use crate::core::error::AppResult;
use crate::core::shared::state::AppState;
use crate::realtime::{emit, EventKind, SocketEvent};

pub async fn list_contacts_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ContactListQuery>,
) -> AppResult<Json<ContactListResponse>> {
    let tenant_id = auth.tenant_id;
    let response = state
        .run_db(move |conn| service::list_contacts(conn, tenant_id, query))
        .await?;
    Ok(Json(response))
}

pub async fn create_contact_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(request): Json<CreateContactRequest>,
) -> AppResult<Json<Contact>> {
    let tenant_id = auth.tenant_id;
    let contact = state
        .run_db(move |conn| service::create_contact(conn, tenant_id, request))
        .await?;
    emit(
        &state,
        SocketEvent::new(tenant_id, EventKind::ContactUpdate, &contact),
    );
    Ok(Json(contact))
}

pub async fn get_contact_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Contact>> {
    let tenant_id = auth.tenant_id;
    let contact = state
        .run_db(move |conn| service::find_contact(conn, tenant_id, id))
        .await?;
    Ok(Json(contact))
}

pub async fn update_contact_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateContactRequest>,
) -> AppResult<Json<Contact>> {
    let tenant_id = auth.tenant_id;
    let contact = state
        .run_db(move |conn| service::update_contact(conn, tenant_id, id, request))
        .await?;
    emit(
        &state,
        SocketEvent::new(tenant_id, EventKind::ContactUpdate, &contact),
    );
    Ok(Json(contact))
}

pub async fn delete_contact_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    state
        .run_db(move |conn| service::delete_contact(conn, tenant_id, id))
        .await?;
    Ok(Json(serde_json::json!({ "message": "Contact deleted" })))
}

pub async fn get_wallets_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<ContactWallet>>> {
    let tenant_id = auth.tenant_id;
    let wallets = state
        .run_db(move |conn| {
            service::find_contact(conn, tenant_id, id)?;
            Ok(service::list_wallets(conn, id)?)
        })
        .await?;
    Ok(Json(wallets))
}

pub async fn set_wallets_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<WalletsRequest>,
) -> AppResult<Json<Vec<ContactWallet>>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    let wallets = state
        .run_db(move |conn| service::set_wallets(conn, tenant_id, id, &request.wallets))
        .await?;
    Ok(Json(wallets))
}

pub fn configure_contacts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/contacts",
            get(list_contacts_handler).post(create_contact_handler),
        )
        .route(
            "/api/contacts/{id}",
            get(get_contact_handler)
                .put(update_contact_handler)
                .delete(delete_contact_handler),
        )
        .route(
            "/api/contacts/{id}/wallets",
            get(get_wallets_handler).put(set_wallets_handler),
        )
}
