use uuid::Uuid;

use crate::{
    audit,
    dto::recipes::RecipeShortDto,
    error::{AppError, AppResult},
    media,
    middleware::auth::AuthUser,
    models::Recipe,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub(crate) async fn fetch_recipe_short(
    state: &AppState,
    recipe_id: Uuid,
) -> AppResult<RecipeShortDto> {
    let recipe: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
        .bind(recipe_id)
        .fetch_optional(&state.pool)
        .await?;
    let recipe = recipe.ok_or_else(|| AppError::BadRequest("Recipe not found".into()))?;
    Ok(RecipeShortDto {
        id: recipe.id,
        name: recipe.name,
        image: media::image_url(&recipe.image),
        cooking_time: recipe.cooking_time,
    })
}

pub async fn add_favorite(
    state: &AppState,
    user: &AuthUser,
    recipe_id: Uuid,
) -> AppResult<ApiResponse<RecipeShortDto>> {
    let recipe = fetch_recipe_short(state, recipe_id).await?;

    let existing: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM favorites WHERE user_id = $1 AND recipe_id = $2")
            .bind(user.user_id)
            .bind(recipe_id)
            .fetch_optional(&state.pool)
            .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest("Recipe is already in favorites".into()));
    }

    sqlx::query("INSERT INTO favorites (id, user_id, recipe_id) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(user.user_id)
        .bind(recipe_id)
        .execute(&state.pool)
        .await?;

    audit::record(
        &state.pool,
        user.user_id,
        "favorite_add",
        "favorites",
        serde_json::json!({ "recipe_id": recipe_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Added to favorites",
        recipe,
        Some(Meta::empty()),
    ))
}

pub async fn remove_favorite(
    state: &AppState,
    user: &AuthUser,
    recipe_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND recipe_id = $2")
        .bind(user.user_id)
        .bind(recipe_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::BadRequest("Recipe is not in favorites".into()));
    }

    audit::record(
        &state.pool,
        user.user_id,
        "favorite_remove",
        "favorites",
        serde_json::json!({ "recipe_id": recipe_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Removed from favorites",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
