use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::{debug, info};
use uuid::Uuid;

use super::types::*;
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::{contact_wallets, contacts, users};
use crate::core::shared::utils::{normalize_number, Page};

const ERR_DUPLICATED_CONTACT: &str = "ERR_DUPLICATED_CONTACT";

fn map_unique(e: DieselError) -> AppError {
    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::conflict(ERR_DUPLICATED_CONTACT)
        }
        other => other.into(),
    }
}

pub fn find_contact(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> AppResult<Contact> {
    contacts::table
        .filter(contacts::id.eq(id))
        .filter(contacts::tenant_id.eq(tenant_id))
        .select(Contact::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ERR_NO_CONTACT_FOUND"))
}

pub fn find_by_number(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    number: &str,
) -> QueryResult<Option<Contact>> {
    contacts::table
        .filter(contacts::tenant_id.eq(tenant_id))
        .filter(contacts::number.eq(number))
        .select(Contact::as_select())
        .first(conn)
        .optional()
}

pub fn list_contacts(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    query: ContactListQuery,
) -> AppResult<ContactListResponse> {
    let page = Page::new(query.page, query.per_page.unwrap_or(40).clamp(1, 200))?;

    let search = query
        .search
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let build = || {
        let mut q = contacts::table
            .filter(contacts::tenant_id.eq(tenant_id))
            .into_boxed();
        if let Some(search) = &search {
            let pattern = format!("%{search}%");
            q = q.filter(
                contacts::name
                    .ilike(pattern.clone())
                    .or(contacts::number.ilike(pattern)),
            );
        }
        q
    };

    let total_count: i64 = build().count().get_result(conn)?;
    let rows: Vec<Contact> = build()
        .order(contacts::name.asc())
        .limit(page.size)
        .offset(page.offset)
        .select(Contact::as_select())
        .load(conn)?;

    Ok(ContactListResponse {
        has_more: page.has_more(total_count),
        contacts: rows,
        total_count,
    })
}

pub fn create_contact(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    request: CreateContactRequest,
) -> AppResult<Contact> {
    let number = if request.is_group {
        request.number.trim().to_string()
    } else {
        normalize_number(&request.number)
    };
    if number.is_empty() {
        return Err(AppError::bad_request("ERR_INVALID_NUMBER"));
    }
    if find_by_number(conn, tenant_id, &number)?.is_some() {
        return Err(AppError::conflict(ERR_DUPLICATED_CONTACT));
    }

    let now = Utc::now();
    let contact = Contact {
        id: Uuid::new_v4(),
        tenant_id,
        name: if request.name.trim().is_empty() {
            number.clone()
        } else {
            request.name.trim().to_string()
        },
        number,
        email: request.email,
        profile_pic_url: request.profile_pic_url,
        is_group: request.is_group,
        extra_info: request.extra_info.unwrap_or_else(|| serde_json::json!({})),
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(contacts::table)
        .values(&contact)
        .execute(conn)
        .map_err(map_unique)?;
    Ok(contact)
}

pub fn update_contact(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    id: Uuid,
    mut request: UpdateContactRequest,
) -> AppResult<Contact> {
    let current = find_contact(conn, tenant_id, id)?;
    if let Some(number) = request.number.take() {
        let number = if current.is_group {
            number.trim().to_string()
        } else {
            normalize_number(&number)
        };
        if number.is_empty() {
            return Err(AppError::bad_request("ERR_INVALID_NUMBER"));
        }
        request.number = Some(number);
    }
    request.updated_at = Some(Utc::now());

    diesel::update(contacts::table.find(id))
        .set(&request)
        .returning(Contact::as_returning())
        .get_result(conn)
        .map_err(map_unique)
}

pub fn delete_contact(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> AppResult<()> {
    let deleted = diesel::delete(
        contacts::table
            .filter(contacts::id.eq(id))
            .filter(contacts::tenant_id.eq(tenant_id)),
    )
    .execute(conn)?;
    if deleted == 0 {
        return Err(AppError::not_found("ERR_NO_CONTACT_FOUND"));
    }
    Ok(())
}

pub fn list_wallets(conn: &mut PgConnection, contact_id: Uuid) -> QueryResult<Vec<ContactWallet>> {
    contact_wallets::table
        .filter(contact_wallets::contact_id.eq(contact_id))
        .order(contact_wallets::created_at.asc())
        .select(ContactWallet::as_select())
        .load(conn)
}

/// Replaces the contact's wallet owners; ids outside the tenant are dropped.
pub fn set_wallets(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    contact_id: Uuid,
    wallet_ids: &[Uuid],
) -> AppResult<Vec<ContactWallet>> {
    find_contact(conn, tenant_id, contact_id)?;
    let valid: Vec<Uuid> = users::table
        .filter(users::tenant_id.eq(tenant_id))
        .filter(users::id.eq_any(wallet_ids))
        .select(users::id)
        .load(conn)?;

    conn.transaction::<_, AppError, _>(|conn| {
        diesel::delete(contact_wallets::table.filter(contact_wallets::contact_id.eq(contact_id)))
            .execute(conn)?;
        let now = Utc::now();
        // keep the caller's order so the first wallet stays first
        let rows: Vec<ContactWallet> = wallet_ids
            .iter()
            .filter(|id| valid.contains(id))
            .enumerate()
            .map(|(i, wallet_id)| ContactWallet {
                id: Uuid::new_v4(),
                tenant_id,
                contact_id,
                wallet_id: *wallet_id,
                created_at: now + chrono::Duration::microseconds(i as i64),
            })
            .collect();
        if !rows.is_empty() {
            diesel::insert_into(contact_wallets::table)
                .values(&rows)
                .execute(conn)?;
        }
        Ok(rows)
    })
}

pub fn first_wallet_user(conn: &mut PgConnection, contact_id: Uuid) -> QueryResult<Option<Uuid>> {
    contact_wallets::table
        .filter(contact_wallets::contact_id.eq(contact_id))
        .order(contact_wallets::created_at.asc())
        .select(contact_wallets::wallet_id)
        .first(conn)
        .optional()
}

/// Looks a contact up by number, creating it on first sight and refreshing a changed name.
pub fn find_or_create_contact(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    number: &str,
    name: Option<&str>,
    is_group: bool,
) -> AppResult<Contact> {
    let number = if is_group {
        number.trim().to_string()
    } else {
        normalize_number(number)
    };
    if number.is_empty() {
        return Err(AppError::bad_request("ERR_INVALID_NUMBER"));
    }
    let name = name.map(str::trim).filter(|n| !n.is_empty());

    if let Some(existing) = find_by_number(conn, tenant_id, &number)? {
        return match name {
            Some(name) if name != existing.name => {
                debug!("Contact {} renamed to {name}", existing.id);
                Ok(diesel::update(contacts::table.find(existing.id))
                    .set((contacts::name.eq(name), contacts::updated_at.eq(Utc::now())))
                    .returning(Contact::as_returning())
                    .get_result(conn)?)
            }
            _ => Ok(existing),
        };
    }

    let created = create_contact(
        conn,
        tenant_id,
        CreateContactRequest {
            name: name.unwrap_or(&number).to_string(),
            number: number.clone(),
            email: None,
            profile_pic_url: None,
            is_group,
            extra_info: None,
        },
    );
    match created {
        Ok(contact) => {
            info!("Contact {} created for {number}", contact.id);
            Ok(contact)
        }
        // another inbound message created it first
        Err(AppError::Conflict(_)) => find_by_number(conn, tenant_id, &number)?
            .ok_or_else(|| AppError::conflict(ERR_DUPLICATED_CONTACT)),
        Err(e) => Err(e),
    }
}
