use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::ingredients::{IngredientDto, IngredientList},
    error::{AppError, AppResult},
    response::ApiResponse,
    routes::params::IngredientQuery,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_ingredients))
        .route("/{id}/", get(get_ingredient))
}

#[utoipa::path(
    get,
    path = "/api/ingredients/",
    params(
        ("name" = Option<String>, Query, description = "Case-insensitive name prefix"),
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20")
    ),
    responses(
        (status = 200, description = "List ingredients", body = ApiResponse<IngredientList>)
    ),
    tag = "Ingredients"
)]
pub async fn list_ingredients(
    State(state): State<AppState>,
    Query(query): Query<IngredientQuery>,
) -> AppResult<Json<ApiResponse<IngredientList>>> {
    let (page, limit, offset) = query.pagination().normalize();
    let prefix = query
        .name
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| format!("{s}%"));

    let items = sqlx::query_as::<_, IngredientDto>(
        r#"
        SELECT i.id, i.name, m.name AS measurement_unit
        FROM ingredients i
        JOIN measurements m ON m.id = i.measurement_id
        WHERE ($1::text IS NULL OR i.name ILIKE $1)
        ORDER BY i.name
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(&prefix)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM ingredients i WHERE ($1::text IS NULL OR i.name ILIKE $1)",
    )
    .bind(&prefix)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::paged(
        "Ingredients",
        IngredientList { items },
        page, limit, total.0,
    )))
}

#[utoipa::path(
    get,
    path = "/api/ingredients/{id}/",
    params(
        ("id" = Uuid, Path, description = "Ingredient ID")
    ),
    responses(
        (status = 200, description = "Get ingredient", body = ApiResponse<IngredientDto>),
        (status = 404, description = "Ingredient not found")
    ),
    tag = "Ingredients"
)]
pub async fn get_ingredient(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<IngredientDto>>> {
    let ingredient = sqlx::query_as::<_, IngredientDto>(
        r#"
        SELECT i.id, i.name, m.name AS measurement_unit
        FROM ingredients i
        JOIN measurements m ON m.id = i.measurement_id
        WHERE i.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;
    let ingredient = match ingredient {
        Some(i) => i,
        None => return Err(AppError::NotFound),
    };
    Ok(Json(ApiResponse::success("Ingredient", ingredient, None)))
}
