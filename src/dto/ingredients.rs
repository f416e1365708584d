use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Ingredient with its unit flattened in, as the catalog endpoints expose it.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct IngredientDto {
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IngredientList {
    pub items: Vec<IngredientDto>,
}
