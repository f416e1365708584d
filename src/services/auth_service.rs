use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordVerifier},
};
use rand::{Rng, distributions::Alphanumeric};
use uuid::Uuid;

use crate::{
    audit,
    dto::auth::{TokenLoginRequest, TokenResponse},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::User,
    response::ApiResponse,
    state::AppState,
};

const TOKEN_LENGTH: usize = 40;

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub fn verify_password(password: &str, password_hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub async fn login(
    state: &AppState,
    payload: TokenLoginRequest,
) -> AppResult<ApiResponse<TokenResponse>> {
    let TokenLoginRequest { email, password } = payload;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    let user = match user {
        Some(u) => u,
        None => {
            return Err(AppError::Unauthorized(
                "Unable to log in with provided credentials".into(),
            ));
        }
    };

    if !verify_password(&password, &user.password_hash)? {
        return Err(AppError::Unauthorized(
            "Unable to log in with provided credentials".into(),
        ));
    }

    let token = generate_token();
    sqlx::query("INSERT INTO auth_tokens (id, user_id, token) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(token.as_str())
        .execute(&state.pool)
        .await?;

    audit::record(
        &state.pool,
        user.id,
        "user_login",
        "auth_tokens",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Logged in",
        TokenResponse { auth_token: token },
        None,
    ))
}

/// Destroys the token that authenticated this request.
pub async fn logout(state: &AppState, user: &AuthUser) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM auth_tokens WHERE token = $1")
        .bind(user.token.as_str())
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Unauthorized("Invalid token".into()));
    }

    audit::record(
        &state.pool,
        user.user_id,
        "user_logout",
        "auth_tokens",
        serde_json::json!({}),
    )
    .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_distinct_and_fixed_length() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LENGTH);
        assert_eq!(b.len(), TOKEN_LENGTH);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
