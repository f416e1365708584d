use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

// The pagination fields are inlined in the filter structs below: flattening
// them routes values through serde's string-buffered Content, which cannot
// deserialize `Option<i64>` from a query string.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RecipeQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub author: Option<Uuid>,
    /// Comma-separated tag slugs; a recipe matches if it carries any of them.
    pub tags: Option<String>,
    // The membership flags arrive as 0/1 from clients.
    pub is_favorited: Option<u8>,
    pub is_in_shopping_cart: Option<u8>,
}

impl RecipeQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }

    pub fn is_favorited(&self) -> bool {
        self.is_favorited.unwrap_or(0) != 0
    }

    pub fn is_in_shopping_cart(&self) -> bool {
        self.is_in_shopping_cart.unwrap_or(0) != 0
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IngredientQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    /// Case-insensitive name prefix.
    pub name: Option<String>,
}

impl IngredientQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscriptionsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    /// Caps how many recipes are embedded per followed author.
    pub recipes_limit: Option<i64>,
}

impl SubscriptionsQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::Uri;

    #[test]
    fn pagination_defaults_and_clamps() {
        let p = Pagination { page: None, per_page: None };
        assert_eq!(p.normalize(), (1, 20, 0));

        let p = Pagination { page: Some(0), per_page: Some(1000) };
        assert_eq!(p.normalize(), (1, 100, 0));

        let p = Pagination { page: Some(3), per_page: Some(10) };
        assert_eq!(p.normalize(), (3, 10, 20));
    }

    #[test]
    fn membership_flags_default_to_false() {
        let q = RecipeQuery {
            page: None,
            per_page: None,
            author: None,
            tags: None,
            is_favorited: None,
            is_in_shopping_cart: Some(1),
        };
        assert!(!q.is_favorited());
        assert!(q.is_in_shopping_cart());
    }

    #[test]
    fn parses_explicit_pagination_from_query_string() {
        let uri: Uri = "/api/recipes/?page=2&per_page=5&is_favorited=1"
            .parse()
            .unwrap();
        let Query(q) = Query::<RecipeQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(q.pagination().normalize(), (2, 5, 5));
        assert!(q.is_favorited());

        let uri: Uri = "/api/ingredients/?name=sa&page=3".parse().unwrap();
        let Query(q) = Query::<IngredientQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(q.name.as_deref(), Some("sa"));
        assert_eq!(q.pagination().normalize(), (3, 20, 40));

        let uri: Uri = "/api/users/subscriptions/?per_page=7&recipes_limit=2"
            .parse()
            .unwrap();
        let Query(q) = Query::<SubscriptionsQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(q.pagination().normalize(), (1, 7, 0));
        assert_eq!(q.recipes_limit, Some(2));
    }
}
