use axum::{extract::FromRequestParts, http::header};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

/// Authenticated requester, resolved from a DB-backed token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub token: String,
}

/// Optional variant for endpoints readable by anonymous users; carries
/// `None` when no Authorization header is present.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl MaybeAuthUser {
    pub fn user_id(&self) -> Option<Uuid> {
        self.0.as_ref().map(|u| u.user_id)
    }
}

// Both `Token <key>` (Djoser-style clients) and `Bearer <key>` are accepted.
fn extract_token(parts: &axum::http::request::Parts) -> Result<Option<String>, AppError> {
    let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header".into()))?;

    let token = auth_str
        .strip_prefix("Token ")
        .or_else(|| auth_str.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization scheme".into()))?;

    Ok(Some(token.trim().to_string()))
}

async fn lookup(state: &AppState, token: &str) -> Result<AuthUser, AppError> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT user_id FROM auth_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(&state.pool)
            .await?;

    match row {
        Some((user_id,)) => Ok(AuthUser {
            user_id,
            token: token.to_string(),
        }),
        None => Err(AppError::Unauthorized("Invalid token".into())),
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts)?
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;
        lookup(state, &token).await
    }
}

impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match extract_token(parts)? {
            Some(token) => Ok(MaybeAuthUser(Some(lookup(state, &token).await?))),
            None => Ok(MaybeAuthUser(None)),
        }
    }
}
