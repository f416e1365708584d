use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::recipes::{
        CreateRecipeRequest, IngredientAmount, RecipeDto, RecipeIngredientDto, RecipeList,
        UpdateRecipeRequest,
    },
    dto::users::UserDto,
    error::{AppError, AppResult},
    media,
    middleware::auth::{AuthUser, MaybeAuthUser},
    models::Tag,
    response::{ApiResponse, Meta},
    routes::params::RecipeQuery,
    state::AppState,
};

/// Shared validation for create and update. Existence of the referenced tag
/// and ingredient ids is checked against the database separately.
pub fn validate_recipe_payload(
    tags: &[Uuid],
    ingredients: &[IngredientAmount],
    cooking_time: i32,
) -> AppResult<()> {
    if tags.is_empty() {
        return Err(AppError::validation("tags", "At least one tag is required"));
    }
    let unique_tags: HashSet<_> = tags.iter().collect();
    if unique_tags.len() != tags.len() {
        return Err(AppError::validation("tags", "Duplicate tags are not allowed"));
    }

    if ingredients.is_empty() {
        return Err(AppError::validation(
            "ingredients",
            "At least one ingredient is required",
        ));
    }
    let unique_ingredients: HashSet<_> = ingredients.iter().map(|i| i.id).collect();
    if unique_ingredients.len() != ingredients.len() {
        return Err(AppError::validation(
            "ingredients",
            "Duplicate ingredients are not allowed",
        ));
    }
    if ingredients.iter().any(|i| i.amount < 1) {
        return Err(AppError::validation(
            "ingredients",
            "Ingredient amount must be at least 1",
        ));
    }

    if cooking_time < 1 {
        return Err(AppError::validation(
            "cooking_time",
            "Cooking time must be at least 1",
        ));
    }
    Ok(())
}

async fn ensure_tags_exist(state: &AppState, tags: &[Uuid]) -> AppResult<()> {
    let found: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tags WHERE id = ANY($1)")
        .bind(tags)
        .fetch_one(&state.pool)
        .await?;
    if found.0 != tags.len() as i64 {
        return Err(AppError::validation("tags", "Unknown tag id"));
    }
    Ok(())
}

async fn ensure_ingredients_exist(state: &AppState, ids: &[Uuid]) -> AppResult<()> {
    let found: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ingredients WHERE id = ANY($1)")
        .bind(ids)
        .fetch_one(&state.pool)
        .await?;
    if found.0 != ids.len() as i64 {
        return Err(AppError::validation("ingredients", "Unknown ingredient id"));
    }
    Ok(())
}

/// One row of the annotated recipe listing: the recipe, its author, and the
/// viewer-relative flags, all computed in a single query.
#[derive(Debug, FromRow)]
struct RecipeRow {
    id: Uuid,
    author_id: Uuid,
    name: String,
    text: String,
    image: String,
    cooking_time: i32,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    is_favorited: bool,
    is_in_shopping_cart: bool,
    author_email: String,
    author_username: String,
    author_first_name: String,
    author_last_name: String,
    author_is_subscribed: bool,
}

const RECIPE_ROW_SELECT: &str = r#"
    SELECT r.id, r.author_id, r.name, r.text, r.image, r.cooking_time, r.created_at,
           EXISTS(SELECT 1 FROM favorites f
                  WHERE f.user_id = $1 AND f.recipe_id = r.id) AS is_favorited,
           EXISTS(SELECT 1 FROM shoplist_items s
                  WHERE s.user_id = $1 AND s.recipe_id = r.id) AS is_in_shopping_cart,
           u.email AS author_email,
           u.username AS author_username,
           u.first_name AS author_first_name,
           u.last_name AS author_last_name,
           EXISTS(SELECT 1 FROM follows fo
                  WHERE fo.follower_id = $1 AND fo.following_id = u.id) AS author_is_subscribed
    FROM recipes r
    JOIN users u ON u.id = r.author_id
"#;

#[derive(Debug, FromRow)]
struct RecipeTagRow {
    recipe_id: Uuid,
    #[sqlx(flatten)]
    tag: Tag,
}

#[derive(Debug, FromRow)]
struct RecipeIngredientRow {
    recipe_id: Uuid,
    id: Uuid,
    name: String,
    measurement_unit: String,
    amount: i32,
}

/// Assembles full recipe aggregates for a page of rows with two batched
/// association queries instead of per-recipe lookups.
async fn build_dtos(state: &AppState, rows: Vec<RecipeRow>) -> AppResult<Vec<RecipeDto>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

    let tag_rows: Vec<RecipeTagRow> = sqlx::query_as(
        r#"
        SELECT rt.recipe_id, t.id, t.name, t.color, t.slug, t.created_at
        FROM recipe_tags rt
        JOIN tags t ON t.id = rt.tag_id
        WHERE rt.recipe_id = ANY($1)
        ORDER BY t.name
        "#,
    )
    .bind(&ids)
    .fetch_all(&state.pool)
    .await?;

    let ingredient_rows: Vec<RecipeIngredientRow> = sqlx::query_as(
        r#"
        SELECT ri.recipe_id, i.id, i.name, m.name AS measurement_unit, ri.amount
        FROM recipe_ingredients ri
        JOIN ingredients i ON i.id = ri.ingredient_id
        JOIN measurements m ON m.id = i.measurement_id
        WHERE ri.recipe_id = ANY($1)
        ORDER BY i.name
        "#,
    )
    .bind(&ids)
    .fetch_all(&state.pool)
    .await?;

    let mut tags_by_recipe: HashMap<Uuid, Vec<Tag>> = HashMap::new();
    for row in tag_rows {
        tags_by_recipe.entry(row.recipe_id).or_default().push(row.tag);
    }

    let mut ingredients_by_recipe: HashMap<Uuid, Vec<RecipeIngredientDto>> = HashMap::new();
    for row in ingredient_rows {
        ingredients_by_recipe
            .entry(row.recipe_id)
            .or_default()
            .push(RecipeIngredientDto {
                id: row.id,
                name: row.name,
                measurement_unit: row.measurement_unit,
                amount: row.amount,
            });
    }

    Ok(rows
        .into_iter()
        .map(|row| RecipeDto {
            id: row.id,
            tags: tags_by_recipe.remove(&row.id).unwrap_or_default(),
            author: UserDto {
                email: row.author_email,
                id: row.author_id,
                username: row.author_username,
                first_name: row.author_first_name,
                last_name: row.author_last_name,
                is_subscribed: row.author_is_subscribed,
            },
            ingredients: ingredients_by_recipe.remove(&row.id).unwrap_or_default(),
            is_favorited: row.is_favorited,
            is_in_shopping_cart: row.is_in_shopping_cart,
            name: row.name,
            image: media::image_url(&row.image),
            text: row.text,
            cooking_time: row.cooking_time,
        })
        .collect())
}

pub async fn list_recipes(
    state: &AppState,
    viewer: &MaybeAuthUser,
    query: RecipeQuery,
) -> AppResult<ApiResponse<RecipeList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let viewer_id = viewer.user_id();

    let tag_slugs: Option<Vec<String>> = query
        .tags
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|slugs| !slugs.is_empty());

    // Membership filters only apply to authenticated requesters, mirroring
    // how the listing treats the flags themselves.
    let only_favorited = query.is_favorited() && viewer_id.is_some();
    let only_in_cart = query.is_in_shopping_cart() && viewer_id.is_some();

    let filter = r#"
        WHERE ($2::uuid IS NULL OR r.author_id = $2)
          AND ($3::text[] IS NULL OR EXISTS(
                SELECT 1 FROM recipe_tags rt
                JOIN tags t ON t.id = rt.tag_id
                WHERE rt.recipe_id = r.id AND t.slug = ANY($3)))
          AND (NOT $4::bool OR EXISTS(
                SELECT 1 FROM favorites f2
                WHERE f2.user_id = $1 AND f2.recipe_id = r.id))
          AND (NOT $5::bool OR EXISTS(
                SELECT 1 FROM shoplist_items s2
                WHERE s2.user_id = $1 AND s2.recipe_id = r.id))
    "#;

    let sql = format!("{RECIPE_ROW_SELECT} {filter} ORDER BY r.created_at DESC LIMIT $6 OFFSET $7");
    let rows: Vec<RecipeRow> = sqlx::query_as(&sql)
        .bind(viewer_id)
        .bind(query.author)
        .bind(&tag_slugs)
        .bind(only_favorited)
        .bind(only_in_cart)
        .bind(limit)
        .bind(offset)
        .fetch_all(&state.pool)
        .await?;

    let count_sql = format!("SELECT COUNT(*) FROM recipes r {filter}");
    let total: (i64,) = sqlx::query_as(&count_sql)
        .bind(viewer_id)
        .bind(query.author)
        .bind(&tag_slugs)
        .bind(only_favorited)
        .bind(only_in_cart)
        .fetch_one(&state.pool)
        .await?;

    let items = build_dtos(state, rows).await?;
    Ok(ApiResponse::paged(
        "Recipes",
        RecipeList { items },
        page, limit, total.0,
    ))
}

async fn fetch_dto(state: &AppState, viewer_id: Option<Uuid>, id: Uuid) -> AppResult<RecipeDto> {
    let sql = format!("{RECIPE_ROW_SELECT} WHERE r.id = $2");
    let row: Option<RecipeRow> = sqlx::query_as(&sql)
        .bind(viewer_id)
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;
    let row = row.ok_or(AppError::NotFound)?;

    let mut dtos = build_dtos(state, vec![row]).await?;
    Ok(dtos.remove(0))
}

pub async fn get_recipe(
    state: &AppState,
    viewer: &MaybeAuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<RecipeDto>> {
    let dto = fetch_dto(state, viewer.user_id(), id).await?;
    Ok(ApiResponse::success("Recipe", dto, None))
}

/// Inserts the recipe row and both association sets inside one transaction;
/// any failure rolls the whole aggregate back.
pub async fn create_recipe(
    state: &AppState,
    user: &AuthUser,
    payload: CreateRecipeRequest,
) -> AppResult<ApiResponse<RecipeDto>> {
    validate_recipe_payload(&payload.tags, &payload.ingredients, payload.cooking_time)?;
    ensure_tags_exist(state, &payload.tags).await?;
    let ingredient_ids: Vec<Uuid> = payload.ingredients.iter().map(|i| i.id).collect();
    ensure_ingredients_exist(state, &ingredient_ids).await?;

    let image_path = media::save_recipe_image(&state.config.media_root, &payload.image)?;
    let recipe_id = Uuid::new_v4();

    // A failed write must not leave the freshly stored image orphaned.
    if let Err(err) = store_recipe(state, recipe_id, user.user_id, &payload, &image_path).await {
        media::remove_image(&state.config.media_root, &image_path);
        return Err(err);
    }

    audit::record(
        &state.pool,
        user.user_id,
        "recipe_create",
        "recipes",
        serde_json::json!({ "recipe_id": recipe_id }),
    )
    .await;

    let created = fetch_dto(state, Some(user.user_id), recipe_id).await?;
    Ok(ApiResponse::success(
        "Recipe created",
        created,
        Some(Meta::empty()),
    ))
}

async fn store_recipe(
    state: &AppState,
    recipe_id: Uuid,
    author_id: Uuid,
    payload: &CreateRecipeRequest,
    image_path: &str,
) -> AppResult<()> {
    let mut txn = state.pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO recipes (id, author_id, name, text, image, cooking_time)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(recipe_id)
    .bind(author_id)
    .bind(payload.name.as_str())
    .bind(payload.text.as_str())
    .bind(image_path)
    .bind(payload.cooking_time)
    .execute(&mut *txn)
    .await?;

    insert_associations(&mut txn, recipe_id, &payload.tags, &payload.ingredients).await?;

    txn.commit().await?;
    Ok(())
}

async fn insert_associations(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    recipe_id: Uuid,
    tags: &[Uuid],
    ingredients: &[IngredientAmount],
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO recipe_tags (id, recipe_id, tag_id)
        SELECT gen_random_uuid(), $1, tag_id FROM UNNEST($2::uuid[]) AS tag_id
        "#,
    )
    .bind(recipe_id)
    .bind(tags)
    .execute(&mut **txn)
    .await?;

    let ingredient_ids: Vec<Uuid> = ingredients.iter().map(|i| i.id).collect();
    let amounts: Vec<i32> = ingredients.iter().map(|i| i.amount).collect();
    sqlx::query(
        r#"
        INSERT INTO recipe_ingredients (id, recipe_id, ingredient_id, amount)
        SELECT gen_random_uuid(), $1, ingredient_id, amount
        FROM UNNEST($2::uuid[], $3::int[]) AS t(ingredient_id, amount)
        "#,
    )
    .bind(recipe_id)
    .bind(&ingredient_ids)
    .bind(&amounts)
    .execute(&mut **txn)
    .await?;

    Ok(())
}

async fn fetch_author_and_image(state: &AppState, recipe_id: Uuid) -> AppResult<(Uuid, String)> {
    let row: Option<(Uuid, String)> =
        sqlx::query_as("SELECT author_id, image FROM recipes WHERE id = $1")
            .bind(recipe_id)
            .fetch_optional(&state.pool)
            .await?;
    row.ok_or(AppError::NotFound)
}

/// Revalidates, then clears and rebuilds both association sets in one
/// transaction so no partial state is ever visible.
pub async fn update_recipe(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateRecipeRequest,
) -> AppResult<ApiResponse<RecipeDto>> {
    let (author_id, old_image) = fetch_author_and_image(state, id).await?;
    if author_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    validate_recipe_payload(&payload.tags, &payload.ingredients, payload.cooking_time)?;
    ensure_tags_exist(state, &payload.tags).await?;
    let ingredient_ids: Vec<Uuid> = payload.ingredients.iter().map(|i| i.id).collect();
    ensure_ingredients_exist(state, &ingredient_ids).await?;

    let image_path = match payload.image.as_deref() {
        Some(data) => Some(media::save_recipe_image(&state.config.media_root, data)?),
        None => None,
    };

    if let Err(err) = rewrite_recipe(state, id, &payload, image_path.as_deref()).await {
        if let Some(fresh) = image_path.as_deref() {
            media::remove_image(&state.config.media_root, fresh);
        }
        return Err(err);
    }

    // The replaced file is unreferenced once the new path is committed.
    if image_path.is_some() {
        media::remove_image(&state.config.media_root, &old_image);
    }

    audit::record(
        &state.pool,
        user.user_id,
        "recipe_update",
        "recipes",
        serde_json::json!({ "recipe_id": id }),
    )
    .await;

    let updated = fetch_dto(state, Some(user.user_id), id).await?;
    Ok(ApiResponse::success(
        "Recipe updated",
        updated,
        Some(Meta::empty()),
    ))
}

async fn rewrite_recipe(
    state: &AppState,
    id: Uuid,
    payload: &UpdateRecipeRequest,
    image_path: Option<&str>,
) -> AppResult<()> {
    let mut txn = state.pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE recipes
        SET name = $2, text = $3, cooking_time = $4, image = COALESCE($5, image)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(payload.name.as_str())
    .bind(payload.text.as_str())
    .bind(payload.cooking_time)
    .bind(image_path)
    .execute(&mut *txn)
    .await?;

    sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
        .bind(id)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
        .bind(id)
        .execute(&mut *txn)
        .await?;

    insert_associations(&mut txn, id, &payload.tags, &payload.ingredients).await?;

    txn.commit().await?;
    Ok(())
}

pub async fn delete_recipe(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let (author_id, image) = fetch_author_and_image(state, id).await?;
    if author_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    sqlx::query("DELETE FROM recipes WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    media::remove_image(&state.config.media_root, &image);

    audit::record(
        &state.pool,
        user.user_id,
        "recipe_delete",
        "recipes",
        serde_json::json!({ "recipe_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ing(id: Uuid, amount: i32) -> IngredientAmount {
        IngredientAmount { id, amount }
    }

    #[test]
    fn accepts_valid_payload() {
        let tags = vec![Uuid::new_v4(), Uuid::new_v4()];
        let ingredients = vec![ing(Uuid::new_v4(), 5), ing(Uuid::new_v4(), 1)];
        assert!(validate_recipe_payload(&tags, &ingredients, 30).is_ok());
    }

    #[test]
    fn rejects_empty_tags() {
        let ingredients = vec![ing(Uuid::new_v4(), 1)];
        let err = validate_recipe_payload(&[], &ingredients, 10).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "tags"));
    }

    #[test]
    fn rejects_duplicate_tags() {
        let tag = Uuid::new_v4();
        let ingredients = vec![ing(Uuid::new_v4(), 1)];
        let err = validate_recipe_payload(&[tag, tag], &ingredients, 10).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "tags"));
    }

    #[test]
    fn rejects_empty_ingredients() {
        let tags = vec![Uuid::new_v4()];
        let err = validate_recipe_payload(&tags, &[], 10).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "ingredients"));
    }

    #[test]
    fn rejects_duplicate_ingredient_ids() {
        let tags = vec![Uuid::new_v4()];
        let id = Uuid::new_v4();
        let err = validate_recipe_payload(&tags, &[ing(id, 1), ing(id, 2)], 10).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "ingredients"));
    }

    #[test]
    fn rejects_zero_amount() {
        let tags = vec![Uuid::new_v4()];
        let err = validate_recipe_payload(&tags, &[ing(Uuid::new_v4(), 0)], 10).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "ingredients"));
    }

    #[test]
    fn rejects_zero_cooking_time() {
        let tags = vec![Uuid::new_v4()];
        let err = validate_recipe_payload(&tags, &[ing(Uuid::new_v4(), 1)], 0).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "cooking_time"));
    }
}
