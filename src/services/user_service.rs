use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::users::{RegisterUserRequest, SetPasswordRequest, UserDto, UserList},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, MaybeAuthUser},
    models::User,
    response::ApiResponse,
    routes::params::Pagination,
    services::auth_service::verify_password,
    state::AppState,
};

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 150;

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

fn validate_username(username: &str) -> AppResult<()> {
    if username.is_empty() {
        return Err(AppError::validation("username", "This field is required"));
    }
    if username.len() > MAX_NAME_LEN {
        return Err(AppError::validation("username", "At most 150 characters"));
    }
    if username == "me" {
        return Err(AppError::validation("username", "Username \"me\" is reserved"));
    }
    // Same character class the original enforces: letters, digits and @/./+/-/_
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        return Err(AppError::validation(
            "username",
            "Only letters, digits and @/./+/-/_ are allowed",
        ));
    }
    Ok(())
}

fn validate_registration(payload: &RegisterUserRequest) -> AppResult<()> {
    validate_username(&payload.username)?;
    if payload.email.is_empty() || !payload.email.contains('@') {
        return Err(AppError::validation("email", "Enter a valid email address"));
    }
    if payload.email.len() > MAX_EMAIL_LEN {
        return Err(AppError::validation("email", "At most 254 characters"));
    }
    if payload.first_name.is_empty() {
        return Err(AppError::validation("first_name", "This field is required"));
    }
    if payload.first_name.len() > MAX_NAME_LEN || payload.last_name.len() > MAX_NAME_LEN {
        return Err(AppError::validation("first_name", "At most 150 characters"));
    }
    if payload.password.is_empty() {
        return Err(AppError::validation("password", "This field is required"));
    }
    if payload.password.len() > MAX_NAME_LEN {
        return Err(AppError::validation("password", "At most 150 characters"));
    }
    Ok(())
}

pub async fn register(
    state: &AppState,
    payload: RegisterUserRequest,
) -> AppResult<ApiResponse<UserDto>> {
    validate_registration(&payload)?;

    let taken: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM users WHERE email = $1 OR username = $2")
            .bind(payload.email.as_str())
            .bind(payload.username.as_str())
            .fetch_optional(&state.pool)
            .await?;
    if taken.is_some() {
        return Err(AppError::BadRequest(
            "Email or username is already taken".into(),
        ));
    }

    let password_hash = hash_password(&payload.password)?;

    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, username, first_name, last_name, password_hash)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.email.as_str())
    .bind(payload.username.as_str())
    .bind(payload.first_name.as_str())
    .bind(payload.last_name.as_str())
    .bind(password_hash)
    .fetch_one(&state.pool)
    .await?;

    audit::record(
        &state.pool,
        user.id,
        "user_register",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "User created",
        UserDto::from_user(user, false),
        None,
    ))
}

pub async fn list_users(
    state: &AppState,
    viewer: &MaybeAuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<UserList>> {
    let (page, limit, offset) = pagination.normalize();

    #[derive(sqlx::FromRow)]
    struct Row {
        #[sqlx(flatten)]
        user: User,
        is_subscribed: bool,
    }

    let rows: Vec<Row> = sqlx::query_as(
        r#"
        SELECT u.*,
               EXISTS(
                   SELECT 1 FROM follows f
                   WHERE f.follower_id = $1 AND f.following_id = u.id
               ) AS is_subscribed
        FROM users u
        ORDER BY u.created_at
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(viewer.user_id())
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(&state.pool)
        .await?;

    let items = rows
        .into_iter()
        .map(|r| UserDto::from_user(r.user, r.is_subscribed))
        .collect();

    Ok(ApiResponse::paged(
        "OK",
        UserList { items },
        page, limit, total.0,
    ))
}

pub async fn get_user(
    state: &AppState,
    viewer: &MaybeAuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<UserDto>> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;
    let user = user.ok_or(AppError::NotFound)?;

    let is_subscribed = match viewer.user_id() {
        Some(viewer_id) => {
            let exists: (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = $1 AND following_id = $2)",
            )
            .bind(viewer_id)
            .bind(id)
            .fetch_one(&state.pool)
            .await?;
            exists.0
        }
        None => false,
    };

    Ok(ApiResponse::success(
        "OK",
        UserDto::from_user(user, is_subscribed),
        None,
    ))
}

pub async fn current_user(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<UserDto>> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_optional(&state.pool)
        .await?;
    let row = row.ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success(
        "OK",
        UserDto::from_user(row, false),
        None,
    ))
}

pub async fn set_password(
    state: &AppState,
    user: &AuthUser,
    payload: SetPasswordRequest,
) -> AppResult<()> {
    if payload.new_password.is_empty() {
        return Err(AppError::validation("new_password", "This field is required"));
    }
    if payload.new_password.len() > MAX_NAME_LEN {
        return Err(AppError::validation("new_password", "At most 150 characters"));
    }

    let row: Option<(String,)> = sqlx::query_as("SELECT password_hash FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_optional(&state.pool)
        .await?;
    let (password_hash,) = row.ok_or(AppError::NotFound)?;

    if !verify_password(&payload.current_password, &password_hash)? {
        return Err(AppError::validation(
            "current_password",
            "Current password is incorrect",
        ));
    }

    let new_hash = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(user.user_id)
        .bind(new_hash)
        .execute(&state.pool)
        .await?;

    audit::record(
        &state.pool,
        user.user_id,
        "password_change",
        "users",
        serde_json::json!({}),
    )
    .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> RegisterUserRequest {
        RegisterUserRequest {
            email: "cook@example.com".into(),
            username: "cook_01".into(),
            first_name: "Alex".into(),
            last_name: "Smith".into(),
            password: "hunter22".into(),
        }
    }

    #[test]
    fn accepts_valid_registration() {
        assert!(validate_registration(&payload()).is_ok());
    }

    #[test]
    fn rejects_reserved_username_me() {
        let mut p = payload();
        p.username = "me".into();
        let err = validate_registration(&p).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "username"));
    }

    #[test]
    fn rejects_username_with_forbidden_chars() {
        let mut p = payload();
        p.username = "bad name!".into();
        assert!(validate_registration(&p).is_err());
    }

    #[test]
    fn allows_django_style_username_chars() {
        let mut p = payload();
        p.username = "user.name@host+x-1_".into();
        assert!(validate_registration(&p).is_ok());
    }

    #[test]
    fn rejects_email_without_at_sign() {
        let mut p = payload();
        p.email = "not-an-email".into();
        let err = validate_registration(&p).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "email"));
    }

    #[test]
    fn rejects_overlong_username() {
        let mut p = payload();
        p.username = "x".repeat(151);
        assert!(validate_registration(&p).is_err());
    }

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }
}
