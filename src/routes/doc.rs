use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{ApiKey, ApiKeyValue, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{TokenLoginRequest, TokenResponse},
        follows::{SubscriptionDto, SubscriptionList},
        ingredients::{IngredientDto, IngredientList},
        recipes::{
            CreateRecipeRequest, IngredientAmount, RecipeDto, RecipeIngredientDto, RecipeList,
            RecipeShortDto, UpdateRecipeRequest,
        },
        users::{RegisterUserRequest, SetPasswordRequest, UserDto, UserList},
    },
    models::Tag,
    response::{ApiResponse, Meta},
    routes::{auth, health, ingredients, params, recipes, tags, users},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "token_auth",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "Authorization",
                "Token-based auth, format: `Token <key>`",
            ))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::logout,
        users::register,
        users::list_users,
        users::current_user,
        users::set_password,
        users::get_user,
        users::subscriptions,
        users::subscribe,
        users::unsubscribe,
        recipes::list_recipes,
        recipes::get_recipe,
        recipes::create_recipe,
        recipes::update_recipe,
        recipes::delete_recipe,
        recipes::favorite,
        recipes::unfavorite,
        recipes::add_shopping_cart,
        recipes::remove_shopping_cart,
        recipes::download_shopping_cart,
        tags::list_tags,
        tags::get_tag,
        ingredients::list_ingredients,
        ingredients::get_ingredient
    ),
    components(
        schemas(
            TokenLoginRequest,
            TokenResponse,
            RegisterUserRequest,
            SetPasswordRequest,
            UserDto,
            UserList,
            SubscriptionDto,
            SubscriptionList,
            Tag,
            tags::TagList,
            IngredientDto,
            IngredientList,
            IngredientAmount,
            CreateRecipeRequest,
            UpdateRecipeRequest,
            RecipeIngredientDto,
            RecipeDto,
            RecipeShortDto,
            RecipeList,
            params::Pagination,
            params::RecipeQuery,
            params::IngredientQuery,
            params::SubscriptionsQuery,
            Meta,
            ApiResponse<RecipeDto>,
            ApiResponse<RecipeList>,
            ApiResponse<UserDto>,
            ApiResponse<SubscriptionList>
        )
    ),
    security(
        ("token_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Token issue/destroy endpoints"),
        (name = "Users", description = "Registration and profile endpoints"),
        (name = "Subscriptions", description = "Follow endpoints"),
        (name = "Recipes", description = "Recipe CRUD endpoints"),
        (name = "Favorites", description = "Favorite toggles"),
        (name = "ShoppingCart", description = "Shopping list endpoints"),
        (name = "Tags", description = "Tag catalog"),
        (name = "Ingredients", description = "Ingredient catalog"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
