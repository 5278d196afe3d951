//! Session handling: password login, access/refresh JWT pairs and the
//! `AuthUser` extractor every tenant route depends on.

use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    routing::post,
    Json, Router,
};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::config::AuthConfig;
use crate::core::error::{AppError, AppResult};
use crate::core::shared::schema::{tenants, users};
use crate::core::shared::state::AppState;
use crate::users::{Profile, User, UserView};

pub const ERR_SESSION_EXPIRED: &str = "ERR_SESSION_EXPIRED";
pub const ERR_INVALID_CREDENTIALS: &str = "ERR_INVALID_CREDENTIALS";
pub const ERR_NO_PERMISSION: &str = "ERR_NO_PERMISSION";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub tenant_id: Uuid,
    pub profile: String,
    pub token_version: i32,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub token_version: i32,
    pub exp: i64,
}

pub fn hash_password(password: &str) -> AppResult<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let Ok(parsed) = PasswordHash::new(password_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn create_access_token(config: &AuthConfig, user: &User) -> AppResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id,
        tenant_id: user.tenant_id,
        profile: user.profile.clone(),
        token_version: user.token_version,
        exp: (now + Duration::minutes(config.token_expiry_minutes)).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {e}")))
}

pub fn create_refresh_token(config: &AuthConfig, user: &User) -> AppResult<String> {
    let claims = RefreshClaims {
        sub: user.id,
        token_version: user.token_version,
        exp: (Utc::now() + Duration::days(config.refresh_expiry_days)).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.refresh_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign refresh token: {e}")))
}

pub fn decode_access_token(config: &AuthConfig, token: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        warn!("Rejected access token: {e}");
        AppError::Unauthorized(ERR_SESSION_EXPIRED.to_string())
    })
}

pub fn decode_refresh_token(config: &AuthConfig, token: &str) -> AppResult<RefreshClaims> {
    decode::<RefreshClaims>(
        token,
        &DecodingKey::from_secret(config.refresh_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized(ERR_SESSION_EXPIRED.to_string()))
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Caller identity taken from a valid access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub profile: Profile,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        matches!(self.profile, Profile::Admin | Profile::Super)
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden(ERR_NO_PERMISSION))
        }
    }

    pub fn require_super(&self) -> AppResult<()> {
        if self.profile == Profile::Super {
            Ok(())
        } else {
            Err(AppError::forbidden(ERR_NO_PERMISSION))
        }
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            tenant_id: claims.tenant_id,
            profile: claims.profile.parse().unwrap_or(Profile::User),
        }
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized(ERR_SESSION_EXPIRED.to_string()))?;
        let claims = decode_access_token(&state.config.auth, token)?;
        Ok(claims.into())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub refresh_token: String,
    pub user: UserView,
}

fn issue_session(config: &AuthConfig, user: User) -> AppResult<SessionResponse> {
    Ok(SessionResponse {
        token: create_access_token(config, &user)?,
        refresh_token: create_refresh_token(config, &user)?,
        user: user.into(),
    })
}

fn ensure_tenant_active(conn: &mut PgConnection, tenant_id: Uuid) -> AppResult<()> {
    let status: String = tenants::table
        .find(tenant_id)
        .select(tenants::status)
        .first(conn)?;
    if status != "active" {
        return Err(AppError::Unauthorized("ERR_TENANT_INACTIVE".to_string()));
    }
    Ok(())
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<SessionResponse>> {
    let user = state
        .run_db(move |conn| {
            let email = req.email.trim().to_lowercase();
            let user: User = users::table
                .filter(users::email.eq(&email))
                .select(User::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::Unauthorized(ERR_INVALID_CREDENTIALS.to_string()))?;

            if !verify_password(&req.password, &user.password_hash) {
                warn!("Failed login for {email}");
                return Err(AppError::Unauthorized(ERR_INVALID_CREDENTIALS.to_string()));
            }

            ensure_tenant_active(conn, user.tenant_id)?;

            let now = Utc::now();
            Ok(diesel::update(users::table.find(user.id))
                .set((
                    users::is_online.eq(true),
                    users::last_login.eq(Some(now)),
                    users::updated_at.eq(now),
                ))
                .returning(User::as_returning())
                .get_result(conn)?)
        })
        .await?;

    info!("User {} logged in (tenant {})", user.id, user.tenant_id);
    Ok(Json(issue_session(&state.config.auth, user)?))
}

pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<SessionResponse>> {
    let claims = decode_refresh_token(&state.config.auth, &req.refresh_token)?;
    let user = state
        .run_db(move |conn| {
            let user: User = users::table
                .find(claims.sub)
                .select(User::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::Unauthorized(ERR_SESSION_EXPIRED.to_string()))?;

            if user.token_version != claims.token_version {
                return Err(AppError::Unauthorized(ERR_SESSION_EXPIRED.to_string()));
            }
            ensure_tenant_active(conn, user.tenant_id)?;
            Ok(user)
        })
        .await?;

    Ok(Json(issue_session(&state.config.auth, user)?))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let user_id = auth.user_id;
    state
        .run_db(move |conn| {
            diesel::update(users::table.find(user_id))
                .set((
                    users::is_online.eq(false),
                    users::token_version.eq(users::token_version + 1),
                    users::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await?;

    info!("User {user_id} logged out");
    Ok(Json(serde_json::json!({ "success": true })))
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh_token", post(refresh_token))
        .route("/auth/logout", post(logout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::test_config;

    fn sample_user(profile: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Agent".to_string(),
            email: "agent@example.com".to_string(),
            password_hash: String::new(),
            profile: profile.to_string(),
            token_version: 3,
            is_online: false,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret", "not-a-hash"));
    }

    #[test]
    fn test_access_token_claims() {
        let config = test_config();
        let user = sample_user("admin");
        let token = create_access_token(&config.auth, &user).unwrap();
        let claims = decode_access_token(&config.auth, &token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.tenant_id, user.tenant_id);
        assert_eq!(claims.token_version, 3);

        let auth: AuthUser = claims.into();
        assert!(auth.require_admin().is_ok());
        assert!(auth.require_super().is_err());
    }

    #[test]
    fn test_refresh_token_is_not_an_access_token() {
        let config = test_config();
        let user = sample_user("user");
        let refresh = create_refresh_token(&config.auth, &user).unwrap();
        assert!(decode_access_token(&config.auth, &refresh).is_err());
        assert_eq!(
            decode_refresh_token(&config.auth, &refresh).unwrap().token_version,
            3
        );
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_none());
        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), Some("abc"));
        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_none());
    }
}
