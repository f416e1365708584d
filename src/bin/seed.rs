use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum_recipes_api::{config::AppConfig, db::create_pool};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let user_id = ensure_user(&pool, "chef@example.com", "chef", "chef123").await?;
    seed_tags(&pool).await?;
    seed_ingredients(&pool).await?;

    println!("Seed completed. Demo user ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    email: &str,
    username: &str,
    password: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, username, first_name, last_name, password_hash)
        VALUES ($1, $2, $3, $4, '', $5)
        ON CONFLICT (email) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(username)
    .bind("Demo")
    .bind(password_hash)
    .fetch_optional(pool)
    .await?;

    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {email}");
    Ok(user_id)
}

async fn seed_tags(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let tags = vec![
        ("Breakfast", "#E26C2D", "breakfast"),
        ("Lunch", "#49B64E", "lunch"),
        ("Dinner", "#8775D2", "dinner"),
        ("Dessert", "#F9A62B", "dessert"),
    ];

    for (name, color, slug) in tags {
        sqlx::query(
            r#"
            INSERT INTO tags (id, name, color, slug)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(color)
        .bind(slug)
        .execute(pool)
        .await?;
    }

    println!("Seeded tags");
    Ok(())
}

async fn seed_ingredients(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let units = ["g", "ml", "pcs", "tbsp", "tsp"];
    for unit in units {
        sqlx::query(
            r#"
            INSERT INTO measurements (id, name)
            SELECT $1, $2
            WHERE NOT EXISTS (SELECT 1 FROM measurements WHERE name = $2)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(unit)
        .execute(pool)
        .await?;
    }

    let ingredients = vec![
        ("Salt", "g"),
        ("Sugar", "g"),
        ("Flour", "g"),
        ("Milk", "ml"),
        ("Olive oil", "ml"),
        ("Egg", "pcs"),
        ("Butter", "g"),
        ("Tomato", "pcs"),
    ];

    for (name, unit) in ingredients {
        sqlx::query(
            r#"
            INSERT INTO ingredients (id, name, measurement_id)
            SELECT $1, $2, m.id FROM measurements m WHERE m.name = $3
            ON CONFLICT (name, measurement_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(unit)
        .execute(pool)
        .await?;
    }

    println!("Seeded ingredients");
    Ok(())
}
