use axum::{Json, Router, extract::State, http::StatusCode, routing::post};

use crate::{
    dto::auth::{TokenLoginRequest, TokenResponse},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::auth_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/token/login/", post(login))
        .route("/token/logout/", post(logout))
}

#[utoipa::path(
    post,
    path = "/api/auth/token/login/",
    request_body = TokenLoginRequest,
    responses(
        (status = 200, description = "Token issued", body = ApiResponse<TokenResponse>),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<TokenLoginRequest>,
) -> AppResult<Json<ApiResponse<TokenResponse>>> {
    let resp = auth_service::login(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/token/logout/",
    responses(
        (status = 204, description = "Token destroyed"),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("token_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(State(state): State<AppState>, user: AuthUser) -> AppResult<StatusCode> {
    auth_service::logout(&state, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}
