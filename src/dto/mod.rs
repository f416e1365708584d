pub mod auth;
pub mod follows;
pub mod ingredients;
pub mod recipes;
pub mod users;
