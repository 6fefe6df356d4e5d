//! Per-user cloud file storage on top of a flat object store.
//!
//! Users see files and nested directories; underneath, every user owns the
//! key prefix `user-{id}-files/` of a single bucket and directories are
//! nothing more than key prefixes (plus optional zero-length `/` markers).

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
