use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::recipes::RecipeShortDto;

/// A followed author together with a capped preview of their recipes.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionDto {
    pub email: String,
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
    pub recipes: Vec<RecipeShortDto>,
    pub recipes_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionList {
    pub items: Vec<SubscriptionDto>,
}
