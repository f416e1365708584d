use axum_recipes_api::{
    config::AppConfig,
    db::create_pool,
    dto::recipes::{CreateRecipeRequest, IngredientAmount, UpdateRecipeRequest},
    dto::users::RegisterUserRequest,
    error::AppError,
    middleware::auth::{AuthUser, MaybeAuthUser},
    routes::params::{RecipeQuery, SubscriptionsQuery},
    services::{
        auth_service, favorite_service, follow_service, recipe_service, shoplist_service,
        user_service,
    },
    state::AppState,
};
use uuid::Uuid;

// 1x1 transparent PNG
const IMAGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

// Integration flow: register/login -> author recipes -> favorite and queue
// them -> aggregate the shopping list -> follow the author.
#[tokio::test]
async fn recipe_shoplist_and_follow_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let media_dir = tempfile::tempdir()?;
    let state = setup_state(&database_url, media_dir.path()).await?;

    // Register and log in two users.
    let author = register_and_login(&state, "author@example.com", "author").await?;
    let reader = register_and_login(&state, "reader@example.com", "reader").await?;

    // Seed catalog data.
    let gram = insert_measurement(&state, "g").await?;
    let salt = insert_ingredient(&state, "Salt", gram).await?;
    let sugar = insert_ingredient(&state, "Sugar", gram).await?;
    let dinner = insert_tag(&state, "Dinner", "dinner").await?;

    // Author two recipes sharing an ingredient.
    let soup = recipe_service::create_recipe(
        &state,
        &author,
        CreateRecipeRequest {
            ingredients: vec![IngredientAmount { id: salt, amount: 5 }],
            tags: vec![dinner],
            image: IMAGE.into(),
            name: "Soup".into(),
            text: "Boil water, add salt.".into(),
            cooking_time: 20,
        },
    )
    .await?
    .data
    .unwrap();

    let stew = recipe_service::create_recipe(
        &state,
        &author,
        CreateRecipeRequest {
            ingredients: vec![
                IngredientAmount { id: salt, amount: 3 },
                IngredientAmount { id: sugar, amount: 10 },
            ],
            tags: vec![dinner],
            image: IMAGE.into(),
            name: "Stew".into(),
            text: "Simmer everything.".into(),
            cooking_time: 40,
        },
    )
    .await?
    .data
    .unwrap();

    assert_eq!(soup.ingredients.len(), 1);
    assert_eq!(soup.tags.len(), 1);

    // Anonymous listing carries false membership flags.
    let anon = MaybeAuthUser(None);
    let listing = recipe_service::list_recipes(&state, &anon, default_recipe_query())
        .await?
        .data
        .unwrap();
    assert_eq!(listing.items.len(), 2);
    assert!(listing.items.iter().all(|r| !r.is_favorited));
    assert!(listing.items.iter().all(|r| !r.is_in_shopping_cart));

    // Favorite toggles: duplicate add and absent remove both conflict.
    favorite_service::add_favorite(&state, &reader, soup.id).await?;
    assert!(favorite_service::add_favorite(&state, &reader, soup.id).await.is_err());
    favorite_service::remove_favorite(&state, &reader, soup.id).await?;
    assert!(favorite_service::remove_favorite(&state, &reader, soup.id).await.is_err());

    // Queue both recipes; shared "Salt" must merge into one summed line.
    shoplist_service::add_to_shoplist(&state, &reader, soup.id).await?;
    shoplist_service::add_to_shoplist(&state, &reader, stew.id).await?;
    assert!(shoplist_service::add_to_shoplist(&state, &reader, stew.id).await.is_err());

    // Racing past the existence pre-check trips the unique constraint, which
    // must surface as the same conflict instead of a server error.
    let raced = sqlx::query("INSERT INTO shoplist_items (id, user_id, recipe_id) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(reader.user_id)
        .bind(soup.id)
        .execute(&state.pool)
        .await
        .unwrap_err();
    assert!(matches!(AppError::from(raced), AppError::BadRequest(_)));

    let text = shoplist_service::download_shoplist(&state, &reader).await?;
    assert!(text.contains("Salt - 8, g"));
    assert!(text.contains("Sugar - 10, g"));
    assert_eq!(text.matches("Salt").count(), 1);

    // The queued flag is visible to the queuing user.
    let viewer = MaybeAuthUser(Some(reader.clone()));
    let seen = recipe_service::get_recipe(&state, &viewer, soup.id)
        .await?
        .data
        .unwrap();
    assert!(seen.is_in_shopping_cart);
    assert!(!seen.is_favorited);

    // Listing filters: tag slugs, author, and membership flags.
    let by_tag = recipe_service::list_recipes(
        &state,
        &anon,
        RecipeQuery {
            tags: Some("dinner".into()),
            ..default_recipe_query()
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(by_tag.items.len(), 2);

    let no_match = recipe_service::list_recipes(
        &state,
        &anon,
        RecipeQuery {
            tags: Some("supper".into()),
            ..default_recipe_query()
        },
    )
    .await?
    .data
    .unwrap();
    assert!(no_match.items.is_empty());

    let by_author = recipe_service::list_recipes(
        &state,
        &anon,
        RecipeQuery {
            author: Some(author.user_id),
            ..default_recipe_query()
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(by_author.items.len(), 2);

    let by_reader = recipe_service::list_recipes(
        &state,
        &anon,
        RecipeQuery {
            author: Some(reader.user_id),
            ..default_recipe_query()
        },
    )
    .await?
    .data
    .unwrap();
    assert!(by_reader.items.is_empty());

    favorite_service::add_favorite(&state, &reader, stew.id).await?;
    let favorited = recipe_service::list_recipes(
        &state,
        &viewer,
        RecipeQuery {
            is_favorited: Some(1),
            ..default_recipe_query()
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(favorited.items.len(), 1);
    assert_eq!(favorited.items[0].id, stew.id);

    // Membership filters are ignored without a token.
    let anon_favorited = recipe_service::list_recipes(
        &state,
        &anon,
        RecipeQuery {
            is_favorited: Some(1),
            ..default_recipe_query()
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(anon_favorited.items.len(), 2);

    let queued = recipe_service::list_recipes(
        &state,
        &viewer,
        RecipeQuery {
            is_in_shopping_cart: Some(1),
            ..default_recipe_query()
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(queued.items.len(), 2);

    // Pagination caps the page while the meta block reports the full total.
    let paged = recipe_service::list_recipes(
        &state,
        &anon,
        RecipeQuery {
            page: Some(2),
            per_page: Some(1),
            ..default_recipe_query()
        },
    )
    .await?;
    assert_eq!(paged.meta.as_ref().and_then(|m| m.total), Some(2));
    assert_eq!(paged.data.unwrap().items.len(), 1);

    // Update rebuilds associations to exactly the submitted set and replaces
    // the stored image file.
    let (old_image,): (String,) = sqlx::query_as("SELECT image FROM recipes WHERE id = $1")
        .bind(soup.id)
        .fetch_one(&state.pool)
        .await?;

    recipe_service::update_recipe(
        &state,
        &author,
        soup.id,
        UpdateRecipeRequest {
            ingredients: vec![IngredientAmount { id: sugar, amount: 2 }],
            tags: vec![dinner],
            image: Some(IMAGE.into()),
            name: "Sweet soup".into(),
            text: "Boil water, add sugar.".into(),
            cooking_time: 25,
        },
    )
    .await?;

    let (new_image,): (String,) = sqlx::query_as("SELECT image FROM recipes WHERE id = $1")
        .bind(soup.id)
        .fetch_one(&state.pool)
        .await?;
    assert_ne!(old_image, new_image);
    assert!(media_dir.path().join(&new_image).exists());
    assert!(!media_dir.path().join(&old_image).exists());

    let rows: Vec<(Uuid, i32)> = sqlx::query_as(
        "SELECT ingredient_id, amount FROM recipe_ingredients WHERE recipe_id = $1",
    )
    .bind(soup.id)
    .fetch_all(&state.pool)
    .await?;
    assert_eq!(rows, vec![(sugar, 2)]);

    // A non-author cannot touch the recipe.
    assert!(recipe_service::delete_recipe(&state, &reader, soup.id).await.is_err());

    // Follow subsystem: no self-follow, no duplicates.
    assert!(follow_service::subscribe(&state, &reader, reader.user_id).await.is_err());
    follow_service::subscribe(&state, &reader, author.user_id).await?;
    assert!(follow_service::subscribe(&state, &reader, author.user_id).await.is_err());

    let subs = follow_service::list_subscriptions(
        &state,
        &reader,
        SubscriptionsQuery {
            page: None,
            per_page: None,
            recipes_limit: Some(1),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(subs.items.len(), 1);
    assert_eq!(subs.items[0].id, author.user_id);
    assert_eq!(subs.items[0].recipes_count, 2);
    assert_eq!(subs.items[0].recipes.len(), 1);

    follow_service::unsubscribe(&state, &reader, author.user_id).await?;
    assert!(follow_service::unsubscribe(&state, &reader, author.user_id).await.is_err());

    // Deleting a recipe also removes its stored image.
    let (stew_image,): (String,) = sqlx::query_as("SELECT image FROM recipes WHERE id = $1")
        .bind(stew.id)
        .fetch_one(&state.pool)
        .await?;
    recipe_service::delete_recipe(&state, &author, stew.id).await?;
    assert!(!media_dir.path().join(&stew_image).exists());

    // Logout destroys the token; a second logout with it fails.
    auth_service::logout(&state, &reader).await?;
    assert!(auth_service::logout(&state, &reader).await.is_err());

    Ok(())
}

fn default_recipe_query() -> RecipeQuery {
    RecipeQuery {
        page: None,
        per_page: None,
        author: None,
        tags: None,
        is_favorited: None,
        is_in_shopping_cart: None,
    }
}

async fn setup_state(database_url: &str, media_root: &std::path::Path) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    // Clean tables between runs
    sqlx::query(
        "TRUNCATE TABLE recipe_ingredients, recipe_tags, favorites, shoplist_items, follows, \
         recipes, ingredients, measurements, tags, auth_tokens, audit_logs, users \
         RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await?;

    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        media_root: media_root.to_path_buf(),
    };

    Ok(AppState { pool, config })
}

async fn register_and_login(
    state: &AppState,
    email: &str,
    username: &str,
) -> anyhow::Result<AuthUser> {
    let user = user_service::register(
        state,
        RegisterUserRequest {
            email: email.into(),
            username: username.into(),
            first_name: "Test".into(),
            last_name: "User".into(),
            password: "passw0rd".into(),
        },
    )
    .await?
    .data
    .unwrap();

    let token = auth_service::login(
        state,
        axum_recipes_api::dto::auth::TokenLoginRequest {
            email: email.into(),
            password: "passw0rd".into(),
        },
    )
    .await?
    .data
    .unwrap()
    .auth_token;

    Ok(AuthUser {
        user_id: user.id,
        token,
    })
}

async fn insert_measurement(state: &AppState, name: &str) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO measurements (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(&state.pool)
        .await?;
    Ok(id)
}

async fn insert_ingredient(state: &AppState, name: &str, unit: Uuid) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO ingredients (id, name, measurement_id) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(name)
        .bind(unit)
        .execute(&state.pool)
        .await?;
    Ok(id)
}

async fn insert_tag(state: &AppState, name: &str, slug: &str) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO tags (id, name, slug) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(name)
        .bind(slug)
        .execute(&state.pool)
        .await?;
    Ok(id)
}
