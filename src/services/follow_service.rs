use std::collections::HashMap;

use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::follows::{SubscriptionDto, SubscriptionList},
    dto::recipes::RecipeShortDto,
    error::{AppError, AppResult},
    media,
    middleware::auth::AuthUser,
    models::User,
    response::{ApiResponse, Meta},
    routes::params::SubscriptionsQuery,
    state::AppState,
};

pub async fn subscribe(
    state: &AppState,
    user: &AuthUser,
    target_id: Uuid,
) -> AppResult<ApiResponse<SubscriptionDto>> {
    if target_id == user.user_id {
        return Err(AppError::BadRequest("Cannot subscribe to yourself".into()));
    }

    let target: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(target_id)
        .fetch_optional(&state.pool)
        .await?;
    let target = target.ok_or(AppError::NotFound)?;

    let existing: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM follows WHERE follower_id = $1 AND following_id = $2")
            .bind(user.user_id)
            .bind(target_id)
            .fetch_optional(&state.pool)
            .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest("Already subscribed".into()));
    }

    sqlx::query("INSERT INTO follows (id, follower_id, following_id) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(user.user_id)
        .bind(target_id)
        .execute(&state.pool)
        .await?;

    audit::record(
        &state.pool,
        user.user_id,
        "subscribe",
        "follows",
        serde_json::json!({ "following_id": target_id }),
    )
    .await;

    let recipes_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM recipes WHERE author_id = $1")
        .bind(target_id)
        .fetch_one(&state.pool)
        .await?;

    let mut entries =
        build_subscription_dtos(state, vec![(target, recipes_count.0)], None).await?;
    Ok(ApiResponse::success(
        "Subscribed",
        entries.remove(0),
        Some(Meta::empty()),
    ))
}

pub async fn unsubscribe(
    state: &AppState,
    user: &AuthUser,
    target_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
        .bind(user.user_id)
        .bind(target_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::BadRequest("Not subscribed to this user".into()));
    }

    audit::record(
        &state.pool,
        user.user_id,
        "unsubscribe",
        "follows",
        serde_json::json!({ "following_id": target_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Unsubscribed",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

#[derive(Debug, FromRow)]
struct AuthorRecipeRow {
    author_id: Uuid,
    id: Uuid,
    name: String,
    image: String,
    cooking_time: i32,
}

/// Attaches capped recipe previews to a set of followed authors with one
/// windowed query instead of a query per author.
async fn build_subscription_dtos(
    state: &AppState,
    users_with_counts: Vec<(User, i64)>,
    recipes_limit: Option<i64>,
) -> AppResult<Vec<SubscriptionDto>> {
    let author_ids: Vec<Uuid> = users_with_counts.iter().map(|(u, _)| u.id).collect();
    let limit = recipes_limit.unwrap_or(i64::MAX).max(0);

    let rows: Vec<AuthorRecipeRow> = sqlx::query_as(
        r#"
        SELECT author_id, id, name, image, cooking_time
        FROM (
            SELECT r.author_id, r.id, r.name, r.image, r.cooking_time,
                   ROW_NUMBER() OVER (
                       PARTITION BY r.author_id ORDER BY r.created_at DESC
                   ) AS rank
            FROM recipes r
            WHERE r.author_id = ANY($1)
        ) ranked
        WHERE rank <= $2
        "#,
    )
    .bind(&author_ids)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    let mut recipes_by_author: HashMap<Uuid, Vec<RecipeShortDto>> = HashMap::new();
    for row in rows {
        recipes_by_author
            .entry(row.author_id)
            .or_default()
            .push(RecipeShortDto {
                id: row.id,
                name: row.name,
                image: media::image_url(&row.image),
                cooking_time: row.cooking_time,
            });
    }

    Ok(users_with_counts
        .into_iter()
        .map(|(user, recipes_count)| SubscriptionDto {
            email: user.email,
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            is_subscribed: true,
            recipes: recipes_by_author.remove(&user.id).unwrap_or_default(),
            recipes_count,
        })
        .collect())
}

pub async fn list_subscriptions(
    state: &AppState,
    user: &AuthUser,
    query: SubscriptionsQuery,
) -> AppResult<ApiResponse<SubscriptionList>> {
    let (page, limit, offset) = query.pagination().normalize();

    #[derive(FromRow)]
    struct Row {
        #[sqlx(flatten)]
        user: User,
        recipes_count: i64,
    }

    let rows: Vec<Row> = sqlx::query_as(
        r#"
        SELECT u.*,
               (SELECT COUNT(*) FROM recipes r WHERE r.author_id = u.id) AS recipes_count
        FROM follows f
        JOIN users u ON u.id = f.following_id
        WHERE f.follower_id = $1
        ORDER BY f.created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user.user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM follows WHERE follower_id = $1")
        .bind(user.user_id)
        .fetch_one(&state.pool)
        .await?;

    let users_with_counts = rows.into_iter().map(|r| (r.user, r.recipes_count)).collect();
    let items = build_subscription_dtos(state, users_with_counts, query.recipes_limit).await?;

    Ok(ApiResponse::paged(
        "OK",
        SubscriptionList { items },
        page, limit, total.0,
    ))
}
