use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::follows::{SubscriptionDto, SubscriptionList},
    dto::users::{RegisterUserRequest, SetPasswordRequest, UserDto, UserList},
    error::AppResult,
    middleware::auth::{AuthUser, MaybeAuthUser},
    response::ApiResponse,
    routes::params::{Pagination, SubscriptionsQuery},
    services::{follow_service, user_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(register))
        .route("/me/", get(current_user))
        .route("/set_password/", post(set_password))
        .route("/subscriptions/", get(subscriptions))
        .route("/{id}/", get(get_user))
        .route("/{id}/subscribe/", post(subscribe).delete(unsubscribe))
}

#[utoipa::path(
    post,
    path = "/api/users/",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "Register user", body = ApiResponse<UserDto>),
        (status = 400, description = "Validation error or taken email/username")
    ),
    tag = "Users"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<UserDto>>)> {
    let resp = user_service::register(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/users/",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20")
    ),
    responses(
        (status = 200, description = "List users", body = ApiResponse<UserList>)
    ),
    tag = "Users"
)]
pub async fn list_users(
    State(state): State<AppState>,
    viewer: MaybeAuthUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<UserList>>> {
    let resp = user_service::list_users(&state, &viewer, pagination).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/users/me/",
    responses(
        (status = 200, description = "Current user", body = ApiResponse<UserDto>),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("token_auth" = [])),
    tag = "Users"
)]
pub async fn current_user(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<UserDto>>> {
    let resp = user_service::current_user(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/users/set_password/",
    request_body = SetPasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Wrong current password")
    ),
    security(("token_auth" = [])),
    tag = "Users"
)]
pub async fn set_password(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<SetPasswordRequest>,
) -> AppResult<StatusCode> {
    user_service::set_password(&state, &user, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/users/{id}/",
    params(
        ("id" = Uuid, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Get user", body = ApiResponse<UserDto>),
        (status = 404, description = "User not found")
    ),
    tag = "Users"
)]
pub async fn get_user(
    State(state): State<AppState>,
    viewer: MaybeAuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<UserDto>>> {
    let resp = user_service::get_user(&state, &viewer, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/users/subscriptions/",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("recipes_limit" = Option<i64>, Query, description = "Max recipes embedded per author")
    ),
    responses(
        (status = 200, description = "Followed authors with recipes", body = ApiResponse<SubscriptionList>)
    ),
    security(("token_auth" = [])),
    tag = "Subscriptions"
)]
pub async fn subscriptions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<SubscriptionsQuery>,
) -> AppResult<Json<ApiResponse<SubscriptionList>>> {
    let resp = follow_service::list_subscriptions(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/users/{id}/subscribe/",
    params(
        ("id" = Uuid, Path, description = "User ID to follow")
    ),
    responses(
        (status = 201, description = "Subscribed", body = ApiResponse<SubscriptionDto>),
        (status = 400, description = "Self-follow or duplicate follow"),
        (status = 404, description = "User not found")
    ),
    security(("token_auth" = [])),
    tag = "Subscriptions"
)]
pub async fn subscribe(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<ApiResponse<SubscriptionDto>>)> {
    let resp = follow_service::subscribe(&state, &user, id).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}/subscribe/",
    params(
        ("id" = Uuid, Path, description = "User ID to unfollow")
    ),
    responses(
        (status = 200, description = "Unsubscribed", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "Not subscribed")
    ),
    security(("token_auth" = [])),
    tag = "Subscriptions"
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = follow_service::unsubscribe(&state, &user, id).await?;
    Ok(Json(resp))
}
