use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use tracing::warn;

use crate::{error::ApiError, state::AppState, users::repo_types::User};

pub const TOKEN_COOKIE: &str = "token";

/// Verifies `token` and loads its owner, provided the token has not been
/// revoked from the owner's token list.
pub async fn decode_auth_token(state: &AppState, token: &str) -> anyhow::Result<User> {
    let claims = state.jwt.verify(token)?;
    state
        .store
        .find_by_token(claims.sub, token)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user not found"))
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .unwrap_or(raw)
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Authenticated caller: the stored user plus the token it presented.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Cookie first; the bearer header is a development convenience only.
        let token = cookie_value(&parts.headers, TOKEN_COOKIE)
            .or_else(|| {
                state
                    .config
                    .is_development()
                    .then(|| bearer_token(&parts.headers))
                    .flatten()
            })
            .ok_or(ApiError::Unauthorized)?
            .to_string();

        match decode_auth_token(state, &token).await {
            Ok(user) => Ok(AuthUser { user, token }),
            Err(e) => {
                warn!(error = %e, "authentication failed");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

/// An `AuthUser` holding the admin or owner role.
#[derive(Debug, Clone)]
pub struct StaffUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        if !auth.user.role.is_staff() {
            warn!(user_id = %auth.user.id, role = ?auth.user.role, "role not allowed");
            return Err(ApiError::Forbidden);
        }
        Ok(StaffUser(auth))
    }
}
