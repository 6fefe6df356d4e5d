//! Single-file operations: upload, download, info, delete, existence.

use super::{PathService, StorageError, StorageResult, StoreContext, backend, resource_info};
use crate::{
    models::{Resource, UserId},
    store::{ByteStream, ObjectReader, ObjectStat},
};
use tracing::{debug, error};

/// One file of a (possibly multi-file) upload. The body may borrow from the
/// request it is streamed out of.
pub struct UploadFile<'a> {
    pub filename: String,
    pub content_type: Option<String>,
    /// Declared content length; the store rejects a body of another length.
    pub size: Option<u64>,
    pub body: ByteStream<'a>,
}

#[derive(Clone)]
pub struct FileOperationsService {
    ctx: StoreContext,
    paths: PathService,
}

impl FileOperationsService {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            ctx,
            paths: PathService,
        }
    }

    /// Upload `files` into directory `path`, one after another.
    ///
    /// Not atomic: when file *k* fails (for instance because it already
    /// exists) files `1..k` stay stored and the error is returned.
    pub async fn upload_files(
        &self,
        user: UserId,
        path: &str,
        files: Vec<UploadFile<'_>>,
    ) -> StorageResult<Vec<Resource>> {
        self.paths.validate_path(path)?;
        self.paths.validate_directory_path(path)?;

        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            uploaded.push(self.upload_single_file(user, path, file).await?);
        }
        Ok(uploaded)
    }

    /// Validate directory `path`, then upload one file into it. Callers
    /// receiving files one at a time use this in a loop; files stored by
    /// earlier calls stay when a later one fails.
    pub async fn upload_file(
        &self,
        user: UserId,
        path: &str,
        file: UploadFile<'_>,
    ) -> StorageResult<Resource> {
        self.paths.validate_path(path)?;
        self.paths.validate_directory_path(path)?;
        self.upload_single_file(user, path, file).await
    }

    /// Upload one file into directory `path`; never overwrites.
    pub async fn upload_single_file(
        &self,
        user: UserId,
        path: &str,
        file: UploadFile<'_>,
    ) -> StorageResult<Resource> {
        if file.filename.trim().is_empty() {
            return Err(StorageError::InvalidPath("File name is empty".into()));
        }

        let full_path = format!("{}{}", path, file.filename);
        self.paths.validate_path(&full_path)?;

        if self.resource_exists(user, &full_path).await {
            return Err(StorageError::ResourceAlreadyExists(format!(
                "File already exists: {}",
                full_path
            )));
        }

        self.ctx
            .store
            .put(
                &self.ctx.bucket,
                &self.paths.build_user_path(user, &full_path),
                file.body,
                file.size,
                file.content_type,
            )
            .await
            .map_err(backend(format!("Failed to upload file: {}", full_path)))?;

        debug!("uploaded {} for user {}", full_path, user);
        self.get_resource_info(user, &full_path).await
    }

    /// Open `path` for reading. The returned reader must be consumed or
    /// dropped by the caller to release the underlying handle.
    pub async fn download_file(&self, user: UserId, path: &str) -> StorageResult<ObjectReader> {
        self.paths.validate_path(path)?;

        if self.paths.is_directory_path(path) {
            return Err(StorageError::InvalidPath(
                "Cannot download directory as file. Use directory download endpoint.".into(),
            ));
        }

        if !self.resource_exists(user, path).await {
            return Err(not_found("File not found", path));
        }

        self.ctx
            .store
            .get(&self.ctx.bucket, &self.paths.build_user_path(user, path))
            .await
            .map_err(|err| {
                if err.is_no_such_key() {
                    not_found("File not found", path)
                } else {
                    backend(format!("Failed to download file: {}", path))(err)
                }
            })
    }

    /// Describe a file (via stat) or a directory (via prefix probe; root
    /// always exists).
    pub async fn get_resource_info(&self, user: UserId, path: &str) -> StorageResult<Resource> {
        self.paths.validate_path(path)?;

        if self.paths.is_directory_path(path) {
            if !self.paths.is_root(path) {
                let exists = self
                    .ctx
                    .prefix_has_objects(&self.paths.build_user_path(user, path))
                    .await
                    .map_err(backend(format!("Failed to get resource info: {}", path)))?;
                if !exists {
                    return Err(not_found("Directory not found", path));
                }
            }
            return Ok(resource_info::build(path, 0, true));
        }

        let stat = self.stat_object(user, path).await?;
        Ok(resource_info::build(path, stat.size, false))
    }

    /// Remove a single file key.
    pub async fn delete_file(&self, user: UserId, path: &str) -> StorageResult<()> {
        self.paths.validate_path(path)?;

        if self.paths.is_directory_path(path) {
            return Err(StorageError::InvalidPath(
                "Use directory service to delete directories".into(),
            ));
        }

        if !self.resource_exists(user, path).await {
            return Err(not_found("File not found", path));
        }

        self.ctx
            .store
            .remove(&self.ctx.bucket, &self.paths.build_user_path(user, path))
            .await
            .map_err(backend(format!("Failed to delete file: {}", path)))
    }

    /// Best-effort existence check: a directory path is probed by prefix, a
    /// file path by stat. Store faults are logged and read as "absent".
    pub async fn resource_exists(&self, user: UserId, path: &str) -> bool {
        let key = self.paths.build_user_path(user, path);

        if self.paths.is_directory_path(path) {
            return match self.ctx.prefix_has_objects(&key).await {
                Ok(exists) => exists,
                Err(err) => {
                    error!("Error checking resource existence for path {}: {}", path, err);
                    false
                }
            };
        }

        match self.ctx.store.stat(&self.ctx.bucket, &key).await {
            Ok(_) => true,
            Err(err) if err.is_no_such_key() => false,
            Err(err) => {
                error!("Error checking resource existence for path {}: {}", path, err);
                false
            }
        }
    }

    async fn stat_object(&self, user: UserId, path: &str) -> StorageResult<ObjectStat> {
        self.ctx
            .store
            .stat(&self.ctx.bucket, &self.paths.build_user_path(user, path))
            .await
            .map_err(|err| {
                if err.is_no_such_key() {
                    not_found("Resource not found", path)
                } else {
                    backend(format!("Failed to get object metadata: {}", path))(err)
                }
            })
    }
}

fn not_found(what: &str, path: &str) -> StorageError {
    StorageError::ResourceNotFound(format!("{}: {}", what, path))
}
