//! Defines routes for the file and directory API.
//!
//! ## Structure
//! - **Resource endpoints** (files, or directories when the path ends in `/`)
//!   - `POST   /api/resource?path=` — multipart upload into a directory
//!   - `GET    /api/resource?path=` — resource descriptor
//!   - `DELETE /api/resource?path=` — delete a file or a whole directory
//!   - `GET    /api/resource/download?path=` — file bytes or zip archive
//!   - `GET    /api/resource/move?from=&to=` — move or rename
//!   - `GET    /api/resource/search?query=` — substring search
//!
//! - **Directory endpoints**
//!   - `POST   /api/directory?path=` — create an empty directory
//!   - `GET    /api/directory?path=` — list direct children
//!
//! Every `/api` route needs the `x-user-id` identity header.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        resource_handlers::{
            create_directory, delete_resource, download_resource, get_resource, list_directory,
            move_resource, search_resources, upload_resource,
        },
    },
    services::StorageService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Upper bound on a multipart upload request.
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Build and return the router for the storage API.
///
/// The router carries shared state (`StorageService`) to all handlers.
pub fn routes() -> Router<StorageService> {
    let api = Router::new()
        .route(
            "/resource",
            post(upload_resource)
                .get(get_resource)
                .delete(delete_resource)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/resource/download", get(download_resource))
        .route("/resource/move", get(move_resource))
        .route("/resource/search", get(search_resources))
        .route("/directory", post(create_directory).get(list_directory));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api", api)
}
