//! Service layer: hierarchical file/folder semantics on top of a flat
//! [`ObjectStore`].
//!
//! Every service shares one [`StoreContext`] (the store handle plus the
//! configured bucket) and the stateless [`PathService`]. None of them keep
//! per-request state, so they are cheap to clone into handlers.

pub mod archive_service;
pub mod directory_service;
pub mod file_operations;
pub mod move_service;
pub mod path_service;
pub mod resource_info;
pub mod search_service;
pub mod storage_service;

use crate::store::{ListEntry, ListParams, ObjectStore, StoreError, StoreResult};
use std::sync::Arc;
use thiserror::Error;

pub use archive_service::{ArchiveService, ArchiveStream};
pub use directory_service::DirectoryService;
pub use file_operations::{FileOperationsService, UploadFile};
pub use move_service::ResourceMoveService;
pub use path_service::PathService;
pub use search_service::SearchService;
pub use storage_service::{Download, StorageService};

/// Domain errors raised by the service layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    InvalidPath(String),
    #[error("{0}")]
    ResourceNotFound(String),
    #[error("{0}")]
    ResourceAlreadyExists(String),
    #[error("{0}")]
    IllegalOperation(String),
    #[error("{context}")]
    Backend {
        context: String,
        #[source]
        source: StoreError,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Build a `map_err` adapter that wraps a store fault with `context`.
pub(crate) fn backend(context: impl Into<String>) -> impl FnOnce(StoreError) -> StorageError {
    let context = context.into();
    move |source| {
        tracing::error!("{}: {}", context, source);
        StorageError::Backend { context, source }
    }
}

/// Store handle bound to the bucket all user namespaces live in.
#[derive(Clone)]
pub struct StoreContext {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: Arc<str>,
}

impl StoreContext {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// True if at least one key starts with `prefix` (`max_keys = 1`).
    pub(crate) async fn prefix_has_objects(&self, prefix: &str) -> StoreResult<bool> {
        let entries = self
            .store
            .list(&self.bucket, ListParams::probe(prefix))
            .await?;
        Ok(!entries.is_empty())
    }

    pub(crate) async fn list_recursive(&self, prefix: &str) -> StoreResult<Vec<ListEntry>> {
        self.store
            .list(&self.bucket, ListParams::recursive(prefix))
            .await
    }

    /// Batch-remove `keys`, logging every key the store could not delete.
    /// Partial failure is not an error for the caller.
    pub(crate) async fn remove_logging_failures(
        &self,
        keys: Vec<String>,
        operation: &str,
    ) -> StoreResult<()> {
        let failures = self.store.remove_batch(&self.bucket, keys).await?;
        for failure in &failures {
            tracing::error!(
                "Failed to delete object during {}: {} - {}",
                operation,
                failure.key,
                failure.message
            );
        }
        Ok(())
    }
}
