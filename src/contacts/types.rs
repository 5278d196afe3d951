use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::shared::schema::{contact_wallets, contacts};
use crate::core::shared::utils::double_option;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = contacts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Contact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub number: String,
    pub email: Option<String>,
    pub profile_pic_url: Option<String>,
    pub is_group: bool,
    pub extra_info: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = contact_wallets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ContactWallet {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub wallet_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContactRequest {
    pub name: String,
    pub number: String,
    pub email: Option<String>,
    pub profile_pic_url: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    pub extra_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, AsChangeset)]
#[diesel(table_name = contacts)]
pub struct UpdateContactRequest {
    pub name: Option<String>,
    pub number: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub profile_pic_url: Option<Option<String>>,
    pub extra_info: Option<serde_json::Value>,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactListQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactListResponse {
    pub contacts: Vec<Contact>,
    pub total_count: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletsRequest {
    pub wallets: Vec<Uuid>,
}
