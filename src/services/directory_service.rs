//! Directory operations emulated on top of prefix listings.
//!
//! A directory exists iff some key starts with its prefix. Empty directories
//! are kept alive by a zero-length marker object whose key ends in `/`.

use super::{PathService, StorageError, StorageResult, StoreContext, backend, resource_info};
use crate::{
    models::{Resource, UserId},
    store::{ListParams, bytes_stream},
};
use bytes::Bytes;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct DirectoryService {
    ctx: StoreContext,
    paths: PathService,
}

impl DirectoryService {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            ctx,
            paths: PathService,
        }
    }

    /// Write the marker for `path`. The existence check and the write are
    /// separate store calls; concurrent creates both succeed.
    pub async fn create_directory(&self, user: UserId, path: &str) -> StorageResult<Resource> {
        self.paths.validate_path(path)?;
        self.paths.validate_directory_path(path)?;

        if self.directory_exists(user, path).await {
            return Err(StorageError::ResourceAlreadyExists(format!(
                "Directory already exists: {}",
                path
            )));
        }

        self.ctx
            .store
            .put(
                &self.ctx.bucket,
                &self.paths.build_user_path(user, path),
                bytes_stream(Bytes::new()),
                Some(0),
                None,
            )
            .await
            .map_err(backend(format!("Failed to create directory: {}", path)))?;

        Ok(resource_info::build(path, 0, true))
    }

    /// Direct children of `path` (one delimiter level). An empty path means
    /// the root.
    pub async fn list_directory(&self, user: UserId, path: &str) -> StorageResult<Vec<Resource>> {
        let path = if path.is_empty() { "/" } else { path };

        self.paths.validate_path(path)?;
        self.paths.validate_directory_path(path)?;

        if !self.directory_exists(user, path).await {
            return Err(StorageError::ResourceNotFound(format!(
                "Directory not found: {}",
                path
            )));
        }

        let prefix = self.paths.build_user_path(user, path);
        let entries = self
            .ctx
            .store
            .list(&self.ctx.bucket, ListParams::one_level(prefix.as_str()))
            .await
            .map_err(backend(format!("Failed to list directory: {}", path)))?;

        let resources = entries
            .into_iter()
            .filter(|entry| entry.key != prefix)
            .filter_map(|entry| {
                let relative = self.paths.strip_user_path(&entry.key, user);
                if relative.is_empty() {
                    return None;
                }
                let is_dir = entry.is_dir || entry.key.ends_with('/');
                Some(resource_info::build(relative, entry.size, is_dir))
            })
            .collect();

        Ok(resources)
    }

    /// Remove every key under `path`.
    ///
    /// Keys the store fails to delete are logged and left behind; the call
    /// still succeeds.
    pub async fn delete_directory(&self, user: UserId, path: &str) -> StorageResult<()> {
        self.paths.validate_path(path)?;
        self.paths.validate_directory_path(path)?;

        if self.paths.is_root(path) {
            return Err(StorageError::IllegalOperation(
                "Cannot delete root directory".into(),
            ));
        }

        if !self.directory_exists(user, path).await {
            return Err(StorageError::ResourceNotFound(format!(
                "Directory not found: {}",
                path
            )));
        }

        let prefix = self.paths.build_user_path(user, path);
        let keys: Vec<String> = self
            .ctx
            .list_recursive(&prefix)
            .await
            .map_err(backend(format!("Failed to delete directory: {}", path)))?
            .into_iter()
            .map(|entry| entry.key)
            .collect();

        if keys.is_empty() {
            warn!("No objects found to delete for directory: {}", path);
            return Ok(());
        }

        let count = keys.len();
        self.ctx
            .remove_logging_failures(keys, "directory delete")
            .await
            .map_err(backend(format!("Failed to delete directory: {}", path)))?;

        info!("Deleted directory: {} ({} objects)", path, count);
        Ok(())
    }

    /// Root always exists; otherwise a bounded prefix probe. Store faults
    /// read as "absent".
    pub async fn directory_exists(&self, user: UserId, path: &str) -> bool {
        if self.paths.is_root(path) {
            return true;
        }

        match self
            .ctx
            .prefix_has_objects(&self.paths.build_user_path(user, path))
            .await
        {
            Ok(exists) => exists,
            Err(err) => {
                error!("Error checking directory existence for path {}: {}", path, err);
                false
            }
        }
    }
}
