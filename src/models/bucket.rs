//! Represents the single bucket every user namespace lives in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket row.
///
/// The service runs against one configured bucket; user isolation happens
/// through key prefixes inside it, never through separate buckets.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Bucket name (must conform to DNS naming rules).
    pub name: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
