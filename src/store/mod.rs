//! Flat, prefix-addressable object store capability.
//!
//! Everything above this module sees storage only through [`ObjectStore`]:
//! put/get/stat/list/remove/remove_batch/copy on byte-addressed keys inside a
//! bucket. There is no directory concept at this level; a key ending in `/`
//! is just another key.

pub mod local;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::{io, pin::Pin};
use thiserror::Error;
use tokio::io::AsyncRead;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

/// Streaming request body handed to [`ObjectStore::put`]. It may borrow
/// from the request it is read from.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Readable payload returned by [`ObjectStore::get`]. Dropping it releases
/// the underlying file handle or buffer.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NoSuchKey { bucket: String, key: String },
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("declared size {declared} does not match received {received} bytes")]
    SizeMismatch { declared: u64, received: u64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn is_no_such_key(&self) -> bool {
        matches!(self, StoreError::NoSuchKey { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Listing parameters.
///
/// Without a delimiter the listing is recursive. With `Some("/")` keys below
/// the first separator after `prefix` collapse into one common-prefix entry.
#[derive(Clone, Debug, Default)]
pub struct ListParams {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: Option<usize>,
}

impl ListParams {
    pub fn recursive(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn one_level(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: Some("/".into()),
            max_keys: None,
        }
    }

    /// Cheapest possible "is anything under this prefix" query.
    pub fn probe(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: None,
            max_keys: Some(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub key: String,
    pub size: u64,
    /// True for common prefixes produced by delimiter grouping.
    pub is_dir: bool,
}

#[derive(Clone, Debug)]
pub struct ObjectStat {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// One key a batch removal could not delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub message: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `bucket` if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// Stream `body` into `key`, replacing any existing object. When `size`
    /// is declared and the body length differs nothing is committed.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream<'_>,
        size: Option<u64>,
        content_type: Option<String>,
    ) -> StoreResult<ObjectStat>;

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<ObjectReader>;

    async fn stat(&self, bucket: &str, key: &str) -> StoreResult<ObjectStat>;

    async fn list(&self, bucket: &str, params: ListParams) -> StoreResult<Vec<ListEntry>>;

    async fn remove(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Remove every key, continuing past individual failures. Only the keys
    /// that could not be removed are reported back.
    async fn remove_batch(&self, bucket: &str, keys: Vec<String>)
    -> StoreResult<Vec<DeleteFailure>>;

    async fn copy(&self, bucket: &str, src: &str, dst: &str) -> StoreResult<()>;
}

/// Wrap an in-memory buffer as a [`ByteStream`].
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream<'static> {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Compute a synthetic "common prefix" for delimiter listings.
///
/// Returns `Some(prefix)` if the key sits below a separator after the
/// requested prefix, otherwise `None` (the key is a direct child).
pub(crate) fn compute_common_prefix(
    key: &str,
    requested_prefix: &str,
    delimiter: &str,
) -> Option<String> {
    let after_prefix = key.strip_prefix(requested_prefix)?;

    after_prefix.find(delimiter).map(|pos| {
        let mut combined = String::with_capacity(requested_prefix.len() + pos + 1);
        combined.push_str(requested_prefix);
        combined.push_str(&after_prefix[..pos + delimiter.len()]);
        combined
    })
}

/// Apply delimiter grouping and `max_keys` to an ordered run of
/// `(key, size)` pairs already filtered by prefix.
pub(crate) fn group_listing<I>(rows: I, params: &ListParams) -> Vec<ListEntry>
where
    I: IntoIterator<Item = (String, u64)>,
{
    let mut entries: Vec<ListEntry> = Vec::new();
    let limit = params.max_keys.unwrap_or(usize::MAX);

    for (key, size) in rows {
        if entries.len() >= limit {
            break;
        }
        if let Some(delim) = params.delimiter.as_deref() {
            if let Some(common) = compute_common_prefix(&key, &params.prefix, delim) {
                // keys arrive sorted, so a repeated prefix is always the last entry
                if entries.last().is_some_and(|e| e.is_dir && e.key == common) {
                    continue;
                }
                entries.push(ListEntry {
                    key: common,
                    size: 0,
                    is_dir: true,
                });
                continue;
            }
        }
        entries.push(ListEntry {
            key,
            size,
            is_dir: false,
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(keys: &[&str]) -> Vec<(String, u64)> {
        keys.iter().map(|k| (k.to_string(), 1)).collect()
    }

    #[test]
    fn common_prefix_groups_first_level_only() {
        assert_eq!(
            compute_common_prefix("u/a/b/c.txt", "u/", "/"),
            Some("u/a/".to_string())
        );
        assert_eq!(compute_common_prefix("u/file.txt", "u/", "/"), None);
        assert_eq!(compute_common_prefix("other/x", "u/", "/"), None);
    }

    #[test]
    fn one_level_listing_collapses_subtrees() {
        let listed = group_listing(
            rows(&["u/", "u/a/", "u/a/x.txt", "u/a/y.txt", "u/b.txt"]),
            &ListParams::one_level("u/"),
        );
        let keys: Vec<_> = listed.iter().map(|e| (e.key.as_str(), e.is_dir)).collect();
        assert_eq!(keys, vec![("u/", false), ("u/a/", true), ("u/b.txt", false)]);
    }

    #[test]
    fn max_keys_bounds_the_result() {
        let listed = group_listing(rows(&["u/a", "u/b", "u/c"]), &ListParams::probe("u/"));
        assert_eq!(listed.len(), 1);
    }
}
