//! StorageService — the single entry point handlers talk to. It routes each
//! request by path shape (a trailing `/` means directory) to the specialised
//! services and keeps their construction in one place.

use super::{
    ArchiveService, ArchiveStream, DirectoryService, FileOperationsService, PathService,
    ResourceMoveService, SearchService, StorageResult, StoreContext, UploadFile,
};
use crate::{
    models::{Resource, UserId},
    store::{ObjectReader, ObjectStore},
};
use std::sync::Arc;

/// What a download resolves to.
pub enum Download {
    /// A single object; the reader must be drained or dropped.
    File(ObjectReader),
    /// A directory, zipped on demand.
    Archive(ArchiveStream),
}

#[derive(Clone)]
pub struct StorageService {
    ctx: StoreContext,
    paths: PathService,
    files: FileOperationsService,
    directories: DirectoryService,
    mover: ResourceMoveService,
    search: SearchService,
    archives: ArchiveService,
}

impl StorageService {
    /// Wire all services against `bucket` in `store`.
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<Arc<str>>) -> Self {
        let ctx = StoreContext::new(store, bucket);
        let files = FileOperationsService::new(ctx.clone());

        Self {
            paths: PathService,
            directories: DirectoryService::new(ctx.clone()),
            mover: ResourceMoveService::new(ctx.clone(), files.clone()),
            search: SearchService::new(ctx.clone()),
            archives: ArchiveService::new(ctx.clone()),
            files,
            ctx,
        }
    }

    /// The store behind this service, for readiness probes.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.ctx.store
    }

    pub fn bucket(&self) -> &str {
        &self.ctx.bucket
    }

    pub async fn upload(
        &self,
        user: UserId,
        path: &str,
        files: Vec<UploadFile<'_>>,
    ) -> StorageResult<Vec<Resource>> {
        self.files.upload_files(user, path, files).await
    }

    /// Upload a single file into directory `path`, streaming its body.
    pub async fn upload_file(
        &self,
        user: UserId,
        path: &str,
        file: UploadFile<'_>,
    ) -> StorageResult<Resource> {
        self.files.upload_file(user, path, file).await
    }

    /// File paths download as-is; directory paths as a zip archive.
    pub async fn download(&self, user: UserId, path: &str) -> StorageResult<Download> {
        if self.paths.is_directory_path(path) {
            self.archives
                .zip_directory_stream(user, path)
                .await
                .map(Download::Archive)
        } else {
            self.files.download_file(user, path).await.map(Download::File)
        }
    }

    pub async fn resource_info(&self, user: UserId, path: &str) -> StorageResult<Resource> {
        self.files.get_resource_info(user, path).await
    }

    pub async fn create_directory(&self, user: UserId, path: &str) -> StorageResult<Resource> {
        self.directories.create_directory(user, path).await
    }

    pub async fn list_directory(&self, user: UserId, path: &str) -> StorageResult<Vec<Resource>> {
        self.directories.list_directory(user, path).await
    }

    pub async fn delete_resource(&self, user: UserId, path: &str) -> StorageResult<()> {
        if self.paths.is_directory_path(path) {
            self.directories.delete_directory(user, path).await
        } else {
            self.files.delete_file(user, path).await
        }
    }

    pub async fn move_resource(
        &self,
        user: UserId,
        from_path: &str,
        to_path: &str,
    ) -> StorageResult<Resource> {
        self.mover
            .move_or_rename_resource(user, from_path, to_path)
            .await
    }

    pub async fn search(&self, user: UserId, query: &str) -> StorageResult<Vec<Resource>> {
        self.search.search_user_files(user, query).await
    }
}
