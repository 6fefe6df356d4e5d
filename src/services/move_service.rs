//! Move/rename as copy-then-delete.
//!
//! The object store has no rename, so a move is two phases: copy every key to
//! its new name, then delete the originals. A failure between the phases
//! leaves the resource under both paths. "Move succeeded" means the copy
//! phase committed; the delete phase is best-effort.

use super::{
    FileOperationsService, PathService, StorageError, StorageResult, StoreContext, backend,
};
use crate::models::{Resource, UserId};
use tracing::{info, warn};

#[derive(Clone)]
pub struct ResourceMoveService {
    ctx: StoreContext,
    paths: PathService,
    files: FileOperationsService,
}

impl ResourceMoveService {
    pub fn new(ctx: StoreContext, files: FileOperationsService) -> Self {
        Self {
            ctx,
            paths: PathService,
            files,
        }
    }

    /// Move or rename a file (`a.txt` → `b.txt`) or a directory
    /// (`a/` → `b/`). Both paths must have the same shape.
    pub async fn move_or_rename_resource(
        &self,
        user: UserId,
        from_path: &str,
        to_path: &str,
    ) -> StorageResult<Resource> {
        self.paths.validate_path(from_path)?;
        self.paths.validate_path(to_path)?;

        let is_source_dir = self.paths.is_directory_path(from_path);
        let is_target_dir = self.paths.is_directory_path(to_path);
        if is_source_dir != is_target_dir {
            return Err(StorageError::InvalidPath(
                "Resource type must match (file -> file, folder/ -> folder/).".into(),
            ));
        }

        if is_source_dir {
            if self.paths.is_root(from_path) {
                return Err(StorageError::IllegalOperation(
                    "Cannot move root directory".into(),
                ));
            }
            if normalized(to_path).starts_with(normalized(from_path)) {
                return Err(StorageError::InvalidPath(
                    "Cannot move a directory into itself".into(),
                ));
            }
        }

        if !self.files.resource_exists(user, from_path).await {
            return Err(StorageError::ResourceNotFound(format!(
                "Source resource not found: {}",
                from_path
            )));
        }

        if self.files.resource_exists(user, to_path).await {
            return Err(StorageError::ResourceAlreadyExists(format!(
                "Target resource already exists: {}",
                to_path
            )));
        }

        info!(
            "Moving resource: {} -> {} for user {}",
            from_path, to_path, user
        );

        if is_source_dir {
            self.move_directory(user, from_path, to_path).await?;
        } else {
            self.move_file(user, from_path, to_path).await?;
        }

        info!("Moved resource: {} -> {}", from_path, to_path);
        self.files.get_resource_info(user, to_path).await
    }

    async fn move_file(&self, user: UserId, from_path: &str, to_path: &str) -> StorageResult<()> {
        let src = self.paths.build_user_path(user, from_path);
        let dst = self.paths.build_user_path(user, to_path);
        let context = || format!("Failed to move file: {} -> {}", from_path, to_path);

        self.ctx
            .store
            .copy(&self.ctx.bucket, &src, &dst)
            .await
            .map_err(backend(context()))?;

        self.ctx
            .store
            .remove(&self.ctx.bucket, &src)
            .await
            .map_err(backend(context()))
    }

    /// Copy every key under the source prefix, then batch-delete the
    /// originals. Individual delete failures are logged, not raised.
    async fn move_directory(
        &self,
        user: UserId,
        from_path: &str,
        to_path: &str,
    ) -> StorageResult<()> {
        let src_prefix = self.paths.build_user_path(user, from_path);
        let dst_prefix = self.paths.build_user_path(user, to_path);
        let context = || format!("Failed to move directory: {} -> {}", from_path, to_path);

        let keys: Vec<String> = self
            .ctx
            .list_recursive(&src_prefix)
            .await
            .map_err(backend(context()))?
            .into_iter()
            .map(|entry| entry.key)
            .collect();

        if keys.is_empty() {
            warn!("No objects found in source directory: {}", from_path);
            return Ok(());
        }

        info!("Moving directory with {} objects", keys.len());

        for key in &keys {
            let Some(suffix) = key.strip_prefix(src_prefix.as_str()) else {
                continue;
            };
            let dst_key = format!("{}{}", dst_prefix, suffix);
            self.ctx
                .store
                .copy(&self.ctx.bucket, key, &dst_key)
                .await
                .map_err(backend(context()))?;
        }

        self.ctx
            .remove_logging_failures(keys, "move")
            .await
            .map_err(backend(context()))
    }
}

fn normalized(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceType;
    use crate::store::{MemoryObjectStore, ObjectStore, bytes_stream};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    const USER: UserId = UserId(42);

    async fn service() -> (ResourceMoveService, Arc<MemoryObjectStore>) {
        let store = Arc::new(MemoryObjectStore::new());
        store.ensure_bucket("user-files").await.unwrap();
        let ctx = StoreContext::new(store.clone(), "user-files");
        let files = FileOperationsService::new(ctx.clone());
        (ResourceMoveService::new(ctx, files), store)
    }

    async fn put(store: &MemoryObjectStore, key: &str, body: &'static str) {
        store
            .put("user-files", key, bytes_stream(body), None, None)
            .await
            .unwrap();
    }

    async fn read(store: &MemoryObjectStore, key: &str) -> String {
        let mut out = String::new();
        store
            .get("user-files", key)
            .await
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        out
    }

    #[tokio::test]
    async fn renames_a_file() {
        let (mover, store) = service().await;
        put(&store, "user-42-files/docs/readme.txt", "hello").await;

        let moved = mover
            .move_or_rename_resource(USER, "docs/readme.txt", "docs/readme2.txt")
            .await
            .unwrap();
        assert_eq!(moved.parent_path, "docs/");
        assert_eq!(moved.name, "readme2.txt");
        assert_eq!(moved.size, Some(5));
        assert_eq!(moved.resource_type, ResourceType::File);
        assert_eq!(
            store.keys("user-files").await,
            vec!["user-42-files/docs/readme2.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn moves_a_directory_subtree() {
        let (mover, store) = service().await;
        put(&store, "user-42-files/src/", "").await;
        put(&store, "user-42-files/src/a.txt", "A").await;
        put(&store, "user-42-files/src/inner/b.txt", "B").await;
        put(&store, "user-42-files/srcfile.txt", "S").await;

        let moved = mover
            .move_or_rename_resource(USER, "src/", "dst/")
            .await
            .unwrap();
        assert_eq!(moved.name, "dst/");

        assert_eq!(
            store.keys("user-files").await,
            vec![
                "user-42-files/dst/".to_string(),
                "user-42-files/dst/a.txt".to_string(),
                "user-42-files/dst/inner/b.txt".to_string(),
                "user-42-files/srcfile.txt".to_string(),
            ]
        );
        assert_eq!(read(&store, "user-42-files/dst/inner/b.txt").await, "B");
    }

    #[tokio::test]
    async fn shape_mismatch_fails_before_existence_checks() {
        let (mover, _) = service().await;
        assert!(matches!(
            mover.move_or_rename_resource(USER, "a/", "b.txt").await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            mover.move_or_rename_resource(USER, "a.txt", "b/").await,
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn missing_source_and_taken_destination() {
        let (mover, store) = service().await;
        put(&store, "user-42-files/a.txt", "a").await;
        put(&store, "user-42-files/b.txt", "b").await;

        assert!(matches!(
            mover.move_or_rename_resource(USER, "x.txt", "y.txt").await,
            Err(StorageError::ResourceNotFound(_))
        ));
        assert!(matches!(
            mover.move_or_rename_resource(USER, "a.txt", "b.txt").await,
            Err(StorageError::ResourceAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn directory_cannot_move_into_itself() {
        let (mover, store) = service().await;
        put(&store, "user-42-files/a/x", "x").await;
        assert!(matches!(
            mover.move_or_rename_resource(USER, "a/", "a/b/").await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            mover.move_or_rename_resource(USER, "/", "z/").await,
            Err(StorageError::IllegalOperation(_))
        ));
    }

    #[tokio::test]
    async fn failed_deletes_leave_duplicates_but_move_succeeds() {
        let (mover, store) = service().await;
        put(&store, "user-42-files/s/a", "a").await;
        store.fail_removal_of("user-42-files/s/a").await;

        mover
            .move_or_rename_resource(USER, "s/", "t/")
            .await
            .unwrap();
        assert_eq!(
            store.keys("user-files").await,
            vec![
                "user-42-files/s/a".to_string(),
                "user-42-files/t/a".to_string()
            ]
        );
    }
}
