//! Data models for the cloud storage service.
//!
//! `Bucket` and `Object` map to SQLite rows of the local object store via
//! `sqlx::FromRow`; `Resource` is the caller-facing descriptor serialized as
//! JSON by the HTTP layer.

pub mod bucket;
pub mod object;
pub mod resource;
pub mod user;

pub use resource::{Resource, ResourceType};
pub use user::UserId;
