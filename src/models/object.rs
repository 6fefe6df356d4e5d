//! Represents an object stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata row for a single object.
///
/// The payload lives on disk under a path derived from `id`, so two keys that
/// differ only by a trailing `/` never collide on the filesystem.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID, also the payload file name.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Full object key (e.g. `user-7-files/docs/readme.txt`).
    pub key: String,

    /// Content type (MIME type) declared on upload.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: Option<String>,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}
