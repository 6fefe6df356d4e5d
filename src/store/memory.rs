//! In-process object store.
//!
//! Keeps every object in a `BTreeMap` keyed by `(bucket, key)`. Used by the
//! test-suite and for throwaway runs; nothing survives a restart.

use super::{
    ByteStream, DeleteFailure, ListEntry, ListParams, ObjectReader, ObjectStat, ObjectStore,
    StoreError, StoreResult, group_listing,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::RwLock;
use tokio_util::io::StreamReader;
use tracing::debug;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    etag: String,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn stat(&self, key: &str) -> ObjectStat {
        ObjectStat {
            key: key.to_string(),
            size: self.data.len() as u64,
            content_type: self.content_type.clone(),
            etag: Some(self.etag.clone()),
            last_modified: self.last_modified,
        }
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashSet<String>>,
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
    failing_removals: RwLock<HashSet<String>>,
    failing_reads: RwLock<HashSet<String>>,
    open_readers: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `remove_batch` report `key` as failed and leave it
    /// in place.
    pub async fn fail_removal_of(&self, key: impl Into<String>) {
        self.failing_removals.write().await.insert(key.into());
    }

    /// Make readers of `key` fail halfway through its payload.
    pub async fn fail_reads_of(&self, key: impl Into<String>) {
        self.failing_reads.write().await.insert(key.into());
    }

    /// Readers handed out by `get` that have not been dropped yet.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }

    /// Every key currently stored in `bucket`, in key order.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    async fn ensure_bucket_exists(&self, bucket: &str) -> StoreResult<()> {
        if self.buckets.read().await.contains(bucket) {
            Ok(())
        } else {
            Err(StoreError::BucketNotFound(bucket.to_string()))
        }
    }

    fn no_such_key(bucket: &str, key: &str) -> StoreError {
        StoreError::NoSuchKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.buckets.write().await.insert(bucket.to_string());
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream<'_>,
        size: Option<u64>,
        content_type: Option<String>,
    ) -> StoreResult<ObjectStat> {
        self.ensure_bucket_exists(bucket).await?;
        if key.is_empty() {
            return Err(StoreError::InvalidObjectKey);
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        if let Some(declared) = size {
            if declared != buf.len() as u64 {
                return Err(StoreError::SizeMismatch {
                    declared,
                    received: buf.len() as u64,
                });
            }
        }

        let data = buf.freeze();
        let object = StoredObject {
            etag: format!("{:x}", md5::compute(&data)),
            data,
            content_type,
            last_modified: Utc::now(),
        };
        let stat = object.stat(key);
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), object);
        debug!("memory store: put {}/{} ({} bytes)", bucket, key, stat.size);
        Ok(stat)
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<ObjectReader> {
        self.ensure_bucket_exists(bucket).await?;
        let data = self
            .objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.data.clone())
            .ok_or_else(|| Self::no_such_key(bucket, key))?;

        let inner: ObjectReader = if self.failing_reads.read().await.contains(key) {
            let head = data.slice(..data.len() / 2);
            let chunks = vec![
                Ok(head),
                Err(io::Error::other(format!("read of {} failed", key))),
            ];
            Box::pin(StreamReader::new(futures::stream::iter(chunks)))
        } else {
            Box::pin(Cursor::new(data))
        };

        Ok(Box::pin(CountedReader::new(inner, self.open_readers.clone())))
    }

    async fn stat(&self, bucket: &str, key: &str) -> StoreResult<ObjectStat> {
        self.ensure_bucket_exists(bucket).await?;
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.stat(key))
            .ok_or_else(|| Self::no_such_key(bucket, key))
    }

    async fn list(&self, bucket: &str, params: ListParams) -> StoreResult<Vec<ListEntry>> {
        self.ensure_bucket_exists(bucket).await?;
        let objects = self.objects.read().await;
        let rows = objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(&params.prefix))
            .map(|((_, k), object)| (k.clone(), object.data.len() as u64));
        Ok(group_listing(rows, &params))
    }

    async fn remove(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.ensure_bucket_exists(bucket).await?;
        // S3 semantics: removing a missing key is not an error
        self.objects
            .write()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn remove_batch(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> StoreResult<Vec<DeleteFailure>> {
        self.ensure_bucket_exists(bucket).await?;
        let failing = self.failing_removals.read().await;
        let mut objects = self.objects.write().await;
        let mut failures = Vec::new();

        for key in keys {
            if failing.contains(&key) {
                failures.push(DeleteFailure {
                    key,
                    message: "removal rejected".into(),
                });
                continue;
            }
            objects.remove(&(bucket.to_string(), key));
        }

        Ok(failures)
    }

    async fn copy(&self, bucket: &str, src: &str, dst: &str) -> StoreResult<()> {
        self.ensure_bucket_exists(bucket).await?;
        let mut objects = self.objects.write().await;
        let mut object = objects
            .get(&(bucket.to_string(), src.to_string()))
            .cloned()
            .ok_or_else(|| Self::no_such_key(bucket, src))?;
        object.last_modified = Utc::now();
        objects.insert((bucket.to_string(), dst.to_string()), object);
        Ok(())
    }
}

/// Reader that keeps `open` incremented for as long as it is alive.
struct CountedReader {
    inner: ObjectReader,
    open: Arc<AtomicUsize>,
}

impl CountedReader {
    fn new(inner: ObjectReader, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { inner, open }
    }
}

impl AsyncRead for CountedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().inner.as_mut().poll_read(cx, buf)
    }
}

impl Drop for CountedReader {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bytes_stream;
    use tokio::io::AsyncReadExt;

    async fn store() -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        store.ensure_bucket("b").await.unwrap();
        store
    }

    #[tokio::test]
    async fn put_get_roundtrip_and_stat() {
        let store = store().await;
        store
            .put("b", "k.txt", bytes_stream("hello"), Some(5), None)
            .await
            .unwrap();

        let mut reader = store.get("b", "k.txt").await.unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello");
        assert_eq!(store.stat("b", "k.txt").await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn put_rejects_wrong_declared_size() {
        let store = store().await;
        let err = store
            .put("b", "k.txt", bytes_stream("hello"), Some(3), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { .. }));
        assert!(store.stat("b", "k.txt").await.unwrap_err().is_no_such_key());
    }

    #[tokio::test]
    async fn unknown_bucket_is_reported() {
        let store = MemoryObjectStore::new();
        let err = store.stat("nope", "k").await.unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn batch_removal_reports_injected_failures() {
        let store = store().await;
        for key in ["a", "b"] {
            store
                .put("b", key, bytes_stream(""), Some(0), None)
                .await
                .unwrap();
        }
        store.fail_removal_of("b").await;

        let failures = store
            .remove_batch("b", vec!["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "b");
        assert_eq!(store.keys("b").await, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn injected_read_failure_surfaces_after_partial_data() {
        let store = store().await;
        store
            .put("b", "k", bytes_stream("abcdef"), None, None)
            .await
            .unwrap();
        store.fail_reads_of("k").await;

        let mut reader = store.get("b", "k").await.unwrap();
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
        assert!(reader.read(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn readers_are_counted_until_dropped() {
        let store = store().await;
        store
            .put("b", "k", bytes_stream("x"), None, None)
            .await
            .unwrap();

        let first = store.get("b", "k").await.unwrap();
        let second = store.get("b", "k").await.unwrap();
        assert_eq!(store.open_readers(), 2);
        drop(first);
        assert_eq!(store.open_readers(), 1);
        drop(second);
        assert_eq!(store.open_readers(), 0);
    }
}
