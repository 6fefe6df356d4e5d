//! LocalObjectStore — durable object store backed by SQLite for metadata and
//! local disk for payloads. Payloads are sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{object-id}`; the key never touches the
//! filesystem, so keys like `a` and `a/` can coexist.

use super::{
    ByteStream, DeleteFailure, ListEntry, ListParams, ObjectReader, ObjectStat, ObjectStore,
    StoreError, StoreResult, group_listing,
};
use crate::models::{bucket::Bucket, object::Object};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

const OBJECT_COLUMNS: &str =
    "id, bucket_id, key, content_type, size_bytes, etag, last_modified";

/// Schema applied by [`LocalObjectStore::migrate`].
const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Run the embedded schema statement by statement.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Lightweight readiness check: `SELECT 1` against the pool.
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    /// Reject keys that cannot be stored: empty, oversized, absolute, or
    /// carrying control characters.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.starts_with('/') {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(StoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Compute the physical base folder path for a bucket.
    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard identifiers from MD5(bucket/id), as lowercase hex.
    fn object_shards(bucket_name: &str, id: &Uuid) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, id));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// `base_path/bucket/{shard}/{shard}/{id}`. Parents may not exist yet.
    fn object_path(&self, bucket_name: &str, id: &Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, id);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(id.to_string());
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<Bucket> {
        sqlx::query_as::<Sqlite, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StoreError::BucketNotFound(bucket.to_string()),
                other => StoreError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StoreResult<Object> {
        self.find_object(bucket, key)
            .await?
            .ok_or_else(|| StoreError::NoSuchKey {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            })
    }

    async fn find_object(&self, bucket: &Bucket, key: &str) -> StoreResult<Option<Object>> {
        let sql = format!(
            "SELECT {} FROM objects WHERE key = ? AND bucket_id = ?",
            OBJECT_COLUMNS
        );
        let row = sqlx::query_as::<_, Object>(&sql)
            .bind(key)
            .bind(bucket.id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row)
    }

    /// Point `key` at the payload stored under `id`, replacing any previous
    /// row, then drop the replaced payload best-effort.
    async fn commit_object(
        &self,
        bucket: &Bucket,
        key: &str,
        id: Uuid,
        content_type: Option<String>,
        size_bytes: i64,
        etag: Option<String>,
    ) -> StoreResult<Object> {
        let previous = self.find_object(bucket, key).await?;

        let sql = format!(
            r#"
            INSERT INTO objects ({cols})
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                id = excluded.id,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING {cols}
            "#,
            cols = OBJECT_COLUMNS
        );
        let object = sqlx::query_as::<_, Object>(&sql)
            .bind(id)
            .bind(bucket.id)
            .bind(key)
            .bind(content_type)
            .bind(size_bytes)
            .bind(etag)
            .bind(Utc::now())
            .fetch_one(&*self.db)
            .await?;

        if let Some(old) = previous {
            self.remove_payload(&bucket.name, &old.id).await;
        }

        Ok(object)
    }

    /// Remove a payload file and prune now-empty shard directories. Failures
    /// are logged only; the metadata row is authoritative.
    async fn remove_payload(&self, bucket_name: &str, id: &Uuid) {
        let file_path = self.object_path(bucket_name, id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => {
                debug!("failed to remove payload {}: {}", file_path.display(), err);
                return;
            }
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket_name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
    }

    /// Recursively remove empty directories up to bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn remove_one(&self, bucket: &Bucket, key: &str) -> StoreResult<()> {
        let Some(object) = self.find_object(bucket, key).await? else {
            return Ok(());
        };

        sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(object.id)
            .execute(&*self.db)
            .await?;

        self.remove_payload(&bucket.name, &object.id).await;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        ensure_bucket_name_safe(bucket)?;
        fs::create_dir_all(self.bucket_root(bucket)).await?;

        let result =
            sqlx::query("INSERT OR IGNORE INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
                .bind(Uuid::new_v4())
                .bind(bucket)
                .bind(Utc::now())
                .execute(&*self.db)
                .await?;

        if result.rows_affected() > 0 {
            tracing::info!("Bucket '{}' created", bucket);
        } else {
            debug!("Bucket '{}' already exists", bucket);
        }
        Ok(())
    }

    /// Stream the body to a temp file, computing size and MD5 on the way,
    /// fsync, rename into place, then upsert the metadata row. Temp files are
    /// removed on every error path.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream<'_>,
        size: Option<u64>,
        content_type: Option<String>,
    ) -> StoreResult<ObjectStat> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let id = Uuid::new_v4();
        let file_path = self.object_path(&bucket_rec.name, &id);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut received: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            received += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Some(declared) = size {
            if declared != received {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::SizeMismatch { declared, received });
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let etag = format!("{:x}", digest.compute());
        match self
            .commit_object(
                &bucket_rec,
                key,
                id,
                content_type,
                received as i64,
                Some(etag),
            )
            .await
        {
            Ok(object) => Ok(object_stat(object)),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<ObjectReader> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, &object.id);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NoSuchKey {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok(Box::pin(file))
    }

    async fn stat(&self, bucket: &str, key: &str) -> StoreResult<ObjectStat> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await.map(object_stat)
    }

    /// Keys come back in lexicographical order. Prefix matching uses
    /// `substr` rather than `LIKE` so `_` and `%` in keys match literally.
    async fn list(&self, bucket: &str, params: ListParams) -> StoreResult<Vec<ListEntry>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT key, size_bytes FROM objects WHERE bucket_id = ",
        );
        builder.push_bind(bucket_rec.id);

        if !params.prefix.is_empty() {
            builder.push(" AND substr(key, 1, ");
            builder.push_bind(params.prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(params.prefix.clone());
        }

        builder.push(" ORDER BY key ASC");

        // with a delimiter the limit applies after grouping
        if let (Some(max_keys), None) = (params.max_keys, params.delimiter.as_ref()) {
            builder.push(" LIMIT ");
            builder.push_bind(max_keys as i64);
        }

        let rows: Vec<(String, i64)> = builder.build_query_as().fetch_all(&*self.db).await?;
        let rows = rows
            .into_iter()
            .map(|(key, size)| (key, size.max(0) as u64));

        Ok(group_listing(rows, &params))
    }

    async fn remove(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.remove_one(&bucket_rec, key).await
    }

    async fn remove_batch(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> StoreResult<Vec<DeleteFailure>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let mut failures = Vec::new();

        for key in keys {
            let outcome = match self.ensure_key_safe(&key) {
                Ok(()) => self.remove_one(&bucket_rec, &key).await,
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                failures.push(DeleteFailure {
                    key,
                    message: err.to_string(),
                });
            }
        }

        Ok(failures)
    }

    async fn copy(&self, bucket: &str, src: &str, dst: &str) -> StoreResult<()> {
        self.ensure_key_safe(src)?;
        self.ensure_key_safe(dst)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let source = self.fetch_object(&bucket_rec, src).await?;

        let id = Uuid::new_v4();
        let src_path = self.object_path(&bucket_rec.name, &source.id);
        let dst_path = self.object_path(&bucket_rec.name, &id);
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src_path, &dst_path).await?;

        if let Err(err) = self
            .commit_object(
                &bucket_rec,
                dst,
                id,
                source.content_type,
                source.size_bytes,
                source.etag,
            )
            .await
        {
            let _ = fs::remove_file(&dst_path).await;
            return Err(err);
        }
        Ok(())
    }
}

fn object_stat(object: Object) -> ObjectStat {
    ObjectStat {
        key: object.key,
        size: object.size_bytes.max(0) as u64,
        content_type: object.content_type,
        etag: object.etag,
        last_modified: object.last_modified,
    }
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| {
        Err(StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        })
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return invalid("must be between 3 and 63 characters");
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
    }

    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return invalid("must start and end with a lowercase letter or digit");
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return invalid("cannot contain consecutive dots or dot-hyphen combinations");
    }

    if is_ipv4_like(name) {
        return invalid("must not be formatted like an IP address");
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bytes_stream;
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::io::AsyncReadExt;

    async fn store(dir: &tempfile::TempDir) -> LocalObjectStore {
        // one connection keeps the in-memory database alive and shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = LocalObjectStore::new(Arc::new(pool), dir.path());
        store.migrate().await.unwrap();
        store.ensure_bucket("user-files").await.unwrap();
        store
    }

    async fn read_all(mut reader: ObjectReader) -> String {
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(ensure_bucket_name_safe("user-files").is_ok());
        assert!(ensure_bucket_name_safe("ab").is_err());
        assert!(ensure_bucket_name_safe("Upper").is_err());
        assert!(ensure_bucket_name_safe("-edge").is_err());
        assert!(ensure_bucket_name_safe("a..b").is_err());
        assert!(ensure_bucket_name_safe("192.168.0.1").is_err());
    }

    #[tokio::test]
    async fn put_overwrite_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store
            .put("user-files", "u/a.txt", bytes_stream("one"), Some(3), None)
            .await
            .unwrap();
        store
            .put("user-files", "u/a.txt", bytes_stream("second"), None, None)
            .await
            .unwrap();

        assert_eq!(store.stat("user-files", "u/a.txt").await.unwrap().size, 6);
        assert_eq!(
            read_all(store.get("user-files", "u/a.txt").await.unwrap()).await,
            "second"
        );
    }

    #[tokio::test]
    async fn file_and_marker_with_same_stem_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store
            .put("user-files", "u/a", bytes_stream("file"), None, None)
            .await
            .unwrap();
        store
            .put("user-files", "u/a/", bytes_stream(""), Some(0), None)
            .await
            .unwrap();

        let listed = store
            .list("user-files", ListParams::recursive("u/"))
            .await
            .unwrap();
        let keys: Vec<_> = listed.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["u/a".to_string(), "u/a/".to_string()]);
    }

    #[tokio::test]
    async fn prefix_match_treats_underscore_literally() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        for key in ["u_1/x", "uX1/x"] {
            store
                .put("user-files", key, bytes_stream("x"), None, None)
                .await
                .unwrap();
        }

        let listed = store
            .list("user-files", ListParams::recursive("u_1/"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "u_1/x");
    }

    #[tokio::test]
    async fn copy_then_remove_leaves_independent_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store
            .put("user-files", "u/src", bytes_stream("payload"), None, None)
            .await
            .unwrap();
        store.copy("user-files", "u/src", "u/dst").await.unwrap();
        store.remove("user-files", "u/src").await.unwrap();

        assert!(
            store
                .stat("user-files", "u/src")
                .await
                .unwrap_err()
                .is_no_such_key()
        );
        assert_eq!(
            read_all(store.get("user-files", "u/dst").await.unwrap()).await,
            "payload"
        );
    }

    #[tokio::test]
    async fn batch_removal_reports_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store
            .put("user-files", "u/a", bytes_stream("a"), None, None)
            .await
            .unwrap();

        let failures = store
            .remove_batch("user-files", vec!["u/a".into(), "/abs".into()])
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "/abs");
        assert!(
            store
                .list("user-files", ListParams::probe("u/"))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
