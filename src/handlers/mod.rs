pub mod auth;
pub mod health_handlers;
pub mod resource_handlers;
