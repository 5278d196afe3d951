use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{hash_password, AuthUser, ERR_NO_PERMISSION};
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::{queues, tenants, tickets, user_queues, users};
use crate::core::shared::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Super,
    Admin,
    User,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Super => "super",
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Profile {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "super" => Ok(Self::Super),
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            _ => Err(AppError::bad_request("ERR_INVALID_PROFILE")),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub profile: String,
    pub token_version: i32,
    pub is_online: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User as returned over the API, never carrying the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    pub profile: String,
    pub is_online: bool,
    pub last_login: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queue_ids: Vec<Uuid>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            tenant_id: user.tenant_id,
            name: user.name,
            email: user.email,
            profile: user.profile,
            is_online: user.is_online,
            last_login: user.last_login,
            queue_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub profile: Option<Profile>,
    #[serde(default)]
    pub queue_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub profile: Option<Profile>,
    pub queue_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub search: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserChanges {
    name: Option<String>,
    email: Option<String>,
    password_hash: Option<String>,
    profile: Option<String>,
    updated_at: DateTime<Utc>,
}

pub fn user_queue_ids(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Vec<Uuid>> {
    user_queues::table
        .filter(user_queues::user_id.eq(user_id))
        .select(user_queues::queue_id)
        .load(conn)
}

fn set_user_queues(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
    queue_ids: &[Uuid],
) -> AppResult<()> {
    let valid: Vec<Uuid> = queues::table
        .filter(queues::tenant_id.eq(tenant_id))
        .filter(queues::id.eq_any(queue_ids))
        .select(queues::id)
        .load(conn)?;

    diesel::delete(user_queues::table.filter(user_queues::user_id.eq(user_id))).execute(conn)?;

    let now = Utc::now();
    let rows: Vec<_> = valid
        .iter()
        .map(|queue_id| {
            (
                user_queues::user_id.eq(user_id),
                user_queues::queue_id.eq(*queue_id),
                user_queues::created_at.eq(now),
            )
        })
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(user_queues::table)
            .values(&rows)
            .execute(conn)?;
    }
    Ok(())
}

fn with_queues(conn: &mut PgConnection, user: User) -> AppResult<UserView> {
    let queue_ids = user_queue_ids(conn, user.id)?;
    let mut view = UserView::from(user);
    view.queue_ids = queue_ids;
    Ok(view)
}

fn email_taken(conn: &mut PgConnection, email: &str, except: Option<Uuid>) -> QueryResult<bool> {
    let mut q = users::table.filter(users::email.eq(email)).into_boxed();
    if let Some(id) = except {
        q = q.filter(users::id.ne(id));
    }
    let count: i64 = q.count().get_result(conn)?;
    Ok(count > 0)
}

/// Inserts a user after enforcing the e-mail uniqueness and the tenant's user limit.
pub fn insert_user(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    req: CreateUserRequest,
) -> AppResult<User> {
    let email = req.email.trim().to_lowercase();
    if req.name.trim().is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(AppError::bad_request("ERR_INVALID_USER"));
    }
    if email_taken(conn, &email, None)? {
        return Err(AppError::conflict("ERR_EMAIL_ALREADY_EXISTS"));
    }

    let max_users: i32 = tenants::table
        .find(tenant_id)
        .select(tenants::max_users)
        .first(conn)?;
    let current: i64 = users::table
        .filter(users::tenant_id.eq(tenant_id))
        .count()
        .get_result(conn)?;
    if current >= i64::from(max_users) {
        return Err(AppError::forbidden("ERR_USER_LIMIT_USER_CREATION"));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        tenant_id,
        name: req.name.trim().to_string(),
        email,
        password_hash: hash_password(&req.password)?,
        profile: req.profile.unwrap_or(Profile::User).to_string(),
        token_version: 0,
        is_online: false,
        last_login: None,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(users::table)
        .values(&user)
        .execute(conn)?;
    set_user_queues(conn, tenant_id, user.id, &req.queue_ids)?;
    Ok(user)
}

fn find_user(conn: &mut PgConnection, tenant_id: Uuid, id: Uuid) -> AppResult<User> {
    users::table
        .filter(users::id.eq(id))
        .filter(users::tenant_id.eq(tenant_id))
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ERR_NO_USER_FOUND"))
}

/// Checks that `user_id` belongs to the tenant.
pub fn ensure_user(conn: &mut PgConnection, tenant_id: Uuid, user_id: Uuid) -> AppResult<()> {
    find_user(conn, tenant_id, user_id).map(|_| ())
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<Vec<UserView>>> {
    let tenant_id = auth.tenant_id;
    let views = state
        .run_db(move |conn| {
            let mut q = users::table
                .filter(users::tenant_id.eq(tenant_id))
                .into_boxed();
            if let Some(search) = query.search.filter(|s| !s.trim().is_empty()) {
                let pattern = format!("%{}%", search.trim());
                q = q.filter(users::name.ilike(pattern.clone()).or(users::email.ilike(pattern)));
            }

            let rows: Vec<User> = q
                .order(users::name.asc())
                .select(User::as_select())
                .load(conn)?;

            let mut views = Vec::with_capacity(rows.len());
            for user in rows {
                views.push(with_queues(conn, user)?);
            }
            Ok(views)
        })
        .await?;
    Ok(Json(views))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateUserRequest>,
) -> AppResult<Json<UserView>> {
    auth.require_admin()?;
    if req.profile == Some(Profile::Super) {
        auth.require_super()?;
    }

    let tenant_id = auth.tenant_id;
    let view = state
        .run_db(move |conn| {
            let user = insert_user(conn, tenant_id, req)?;
            info!("User {} created in tenant {tenant_id}", user.id);
            with_queues(conn, user)
        })
        .await?;
    Ok(Json(view))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserView>> {
    let tenant_id = auth.tenant_id;
    let view = state
        .run_db(move |conn| {
            let user = find_user(conn, tenant_id, id)?;
            with_queues(conn, user)
        })
        .await?;
    Ok(Json(view))
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Json<UserView>> {
    if !auth.is_admin() && (auth.user_id != id || req.profile.is_some() || req.queue_ids.is_some())
    {
        return Err(AppError::forbidden(ERR_NO_PERMISSION));
    }
    if req.profile == Some(Profile::Super) {
        auth.require_super()?;
    }

    let tenant_id = auth.tenant_id;
    let view = state
        .run_db(move |conn| {
            find_user(conn, tenant_id, id)?;

            let email = req.email.map(|e| e.trim().to_lowercase());
            if let Some(email) = &email {
                if email_taken(conn, email, Some(id))? {
                    return Err(AppError::conflict("ERR_EMAIL_ALREADY_EXISTS"));
                }
            }
            let password_hash = match req.password.filter(|p| !p.is_empty()) {
                Some(p) => Some(hash_password(&p)?),
                None => None,
            };

            let changes = UserChanges {
                name: req.name,
                email,
                password_hash,
                profile: req.profile.map(|p| p.to_string()),
                updated_at: Utc::now(),
            };
            let user: User = diesel::update(users::table.find(id))
                .set(&changes)
                .returning(User::as_returning())
                .get_result(conn)?;

            if let Some(queue_ids) = req.queue_ids {
                set_user_queues(conn, tenant_id, id, &queue_ids)?;
            }
            with_queues(conn, user)
        })
        .await?;
    Ok(Json(view))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let tenant_id = auth.tenant_id;
    state
        .run_db(move |conn| {
            find_user(conn, tenant_id, id)?;
            conn.transaction::<_, AppError, _>(|conn| {
                let released = diesel::update(
                    tickets::table
                        .filter(tickets::user_id.eq(id))
                        .filter(tickets::status.eq("open")),
                )
                .set((
                    tickets::status.eq("pending"),
                    tickets::user_id.eq(None::<Uuid>),
                    tickets::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
                diesel::delete(users::table.find(id)).execute(conn)?;
                info!("User {id} deleted; {released} open tickets returned to pending");
                Ok(())
            })
        })
        .await?;

    Ok(Json(serde_json::json!({ "message": "User deleted" })))
}

pub fn configure_users_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parse() {
        assert_eq!("ADMIN".parse::<Profile>().unwrap(), Profile::Admin);
        assert_eq!("super".parse::<Profile>().unwrap(), Profile::Super);
        assert!("root".parse::<Profile>().is_err());
        assert_eq!(Profile::User.to_string(), "user");
    }

    #[test]
    fn test_view_hides_password() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "A".into(),
            email: "a@b.c".into(),
            password_hash: "secret-hash".into(),
            profile: "user".into(),
            token_version: 0,
            is_online: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&UserView::from(user)).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("queue_ids"));
    }
}
