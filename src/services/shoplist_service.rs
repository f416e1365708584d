use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::recipes::RecipeShortDto,
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    response::{ApiResponse, Meta},
    services::favorite_service::fetch_recipe_short,
    state::AppState,
};

pub const SHOPLIST_FILENAME: &str = "shoplst.txt";

pub async fn add_to_shoplist(
    state: &AppState,
    user: &AuthUser,
    recipe_id: Uuid,
) -> AppResult<ApiResponse<RecipeShortDto>> {
    let recipe = fetch_recipe_short(state, recipe_id).await?;

    let existing: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM shoplist_items WHERE user_id = $1 AND recipe_id = $2")
            .bind(user.user_id)
            .bind(recipe_id)
            .fetch_optional(&state.pool)
            .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest(
            "Recipe is already in the shopping list".into(),
        ));
    }

    sqlx::query("INSERT INTO shoplist_items (id, user_id, recipe_id) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(user.user_id)
        .bind(recipe_id)
        .execute(&state.pool)
        .await?;

    audit::record(
        &state.pool,
        user.user_id,
        "shoplist_add",
        "shoplist_items",
        serde_json::json!({ "recipe_id": recipe_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Added to shopping list",
        recipe,
        Some(Meta::empty()),
    ))
}

pub async fn remove_from_shoplist(
    state: &AppState,
    user: &AuthUser,
    recipe_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM shoplist_items WHERE user_id = $1 AND recipe_id = $2")
        .bind(user.user_id)
        .bind(recipe_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::BadRequest(
            "Recipe is not in the shopping list".into(),
        ));
    }

    audit::record(
        &state.pool,
        user.user_id,
        "shoplist_remove",
        "shoplist_items",
        serde_json::json!({ "recipe_id": recipe_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Removed from shopping list",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// One summed line of the shopping list: an ingredient with a unit and the
/// total amount across every recipe queued by the user.
#[derive(Debug, FromRow, PartialEq)]
pub struct ShoplistLine {
    pub name: String,
    pub measurement_unit: String,
    pub total_amount: i64,
}

/// Joins the user's shoplist through to ingredient amounts and sums per
/// (ingredient name, unit) pair, so an ingredient shared by several queued
/// recipes collapses into a single line.
pub async fn aggregate_shoplist(state: &AppState, user_id: Uuid) -> AppResult<Vec<ShoplistLine>> {
    let lines = sqlx::query_as(
        r#"
        SELECT i.name, m.name AS measurement_unit, SUM(ri.amount)::bigint AS total_amount
        FROM shoplist_items s
        JOIN recipe_ingredients ri ON ri.recipe_id = s.recipe_id
        JOIN ingredients i ON i.id = ri.ingredient_id
        JOIN measurements m ON m.id = i.measurement_id
        WHERE s.user_id = $1
        GROUP BY i.name, m.name
        ORDER BY i.name
        "#,
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(lines)
}

pub fn render_shoplist(lines: &[ShoplistLine]) -> String {
    let mut out = String::from("Shopping list:\n\n");
    for line in lines {
        out.push_str(&format!(
            "{} - {}, {}\n",
            line.name, line.total_amount, line.measurement_unit
        ));
    }
    out
}

pub async fn download_shoplist(state: &AppState, user: &AuthUser) -> AppResult<String> {
    let lines = aggregate_shoplist(state, user.user_id).await?;
    Ok(render_shoplist(&lines))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str, unit: &str, total: i64) -> ShoplistLine {
        ShoplistLine {
            name: name.into(),
            measurement_unit: unit.into(),
            total_amount: total,
        }
    }

    #[test]
    fn renders_header_only_for_empty_list() {
        assert_eq!(render_shoplist(&[]), "Shopping list:\n\n");
    }

    #[test]
    fn renders_one_line_per_ingredient() {
        let lines = vec![line("Salt", "g", 8), line("Sugar", "g", 100)];
        let text = render_shoplist(&lines);
        assert_eq!(text, "Shopping list:\n\nSalt - 8, g\nSugar - 100, g\n");
    }

    #[test]
    fn merged_ingredient_appears_once() {
        // The GROUP BY upstream guarantees one row per (name, unit); the
        // renderer must not split it back apart.
        let lines = vec![line("Salt", "g", 8)];
        let text = render_shoplist(&lines);
        assert_eq!(text.matches("Salt").count(), 1);
        assert!(text.contains("Salt - 8, g"));
    }
}
