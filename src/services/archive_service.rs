//! Streaming zip archives of a directory subtree.
//!
//! Nothing is buffered beyond one copy chunk: entries are written as the
//! recursive listing is walked and each object's bytes are piped straight
//! from the store reader into the zip entry. Once bytes have reached the
//! consumer a later failure can only abort the stream, leaving a truncated
//! archive.

use super::{PathService, StorageError, StorageResult, StoreContext};
use crate::{models::UserId, store::StoreError};
use async_zip::{Compression, ZipEntryBuilder, base::write::ZipFileWriter};
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::io;
use tokio::{io::AsyncWrite, sync::oneshot};
use tokio_util::{compat::TokioAsyncReadCompatExt, io::ReaderStream};
use tracing::{debug, error};

/// Capacity of the in-memory pipe between the zip writer task and the
/// response body.
const ARCHIVE_PIPE_CAPACITY: usize = 64 * 1024;

const DEFAULT_ARCHIVE_NAME: &str = "archive";

#[derive(Clone)]
pub struct ArchiveService {
    ctx: StoreContext,
    paths: PathService,
}

impl ArchiveService {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            ctx,
            paths: PathService,
        }
    }

    /// Validate `path` and make sure there is something to archive, then
    /// hand back a producer. No archive bytes exist until the producer is
    /// driven, so a `ResourceNotFound` here still reaches the client as a
    /// proper error response.
    pub async fn zip_directory_stream(
        &self,
        user: UserId,
        path: &str,
    ) -> StorageResult<ArchiveStream> {
        self.paths.validate_path(path)?;
        self.paths.validate_directory_path(path)?;

        if !self.has_directory_content(user, path).await {
            return Err(StorageError::ResourceNotFound(format!(
                "Directory not found or empty: {}",
                path
            )));
        }

        Ok(ArchiveStream {
            ctx: self.ctx.clone(),
            prefix: self.paths.build_user_path(user, path),
            root_name: extract_folder_name(path),
        })
    }

    async fn has_directory_content(&self, user: UserId, path: &str) -> bool {
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
                error!("Error checking directory content for path {}: {}", path, err);
                false
            }
        }
    }
}

/// Deferred zip of every key under `prefix`.
pub struct ArchiveStream {
    ctx: StoreContext,
    prefix: String,
    root_name: String,
}

impl ArchiveStream {
    /// Top-level folder name inside the archive (also used for the download
    /// file name).
    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    /// Write the complete archive into `writer` and return it.
    ///
    /// Entry names are `{root_name}/{path below the directory}`. Directory
    /// markers become directory entries; the archived directory's own marker
    /// is implied by the root folder and skipped.
    pub async fn write_to<W>(self, writer: W) -> io::Result<W>
    where
        W: AsyncWrite + Unpin,
    {
        let mut zip = ZipFileWriter::with_tokio(writer);

        let entries = self
            .ctx
            .list_recursive(&self.prefix)
            .await
            .map_err(store_io_error)?;

        for entry in entries {
            let Some(suffix) = entry.key.strip_prefix(self.prefix.as_str()) else {
                continue;
            };
            if suffix.is_empty() {
                continue;
            }

            let mut entry_name = format!("{}/{}", self.root_name, suffix);

            if entry.key.ends_with('/') {
                if !entry_name.ends_with('/') {
                    entry_name.push('/');
                }
                let builder = ZipEntryBuilder::new(entry_name.into(), Compression::Stored);
                zip.write_entry_whole(builder, &[])
                    .await
                    .map_err(io::Error::other)?;
                continue;
            }

            let reader = self
                .ctx
                .store
                .get(&self.ctx.bucket, &entry.key)
                .await
                .map_err(store_io_error)?;

            let builder = ZipEntryBuilder::new(entry_name.into(), Compression::Deflate);
            let mut entry_writer = zip
                .write_entry_stream(builder)
                .await
                .map_err(io::Error::other)?;
            let copied = futures::io::copy(reader.compat(), &mut entry_writer).await?;
            entry_writer.close().await.map_err(io::Error::other)?;

            debug!("zipped {} ({} bytes)", entry.key, copied);
        }

        let inner = zip.close().await.map_err(io::Error::other)?;
        Ok(inner.into_inner())
    }

    /// Run [`write_to`](Self::write_to) on a background task and expose the
    /// archive as a byte stream.
    ///
    /// Dropping the returned stream (client disconnect) breaks the pipe, the
    /// writer task fails on its next write and releases its store reader. A
    /// failure inside the task is surfaced as a trailing `Err` item.
    pub fn into_byte_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        let (writer, reader) = tokio::io::duplex(ARCHIVE_PIPE_CAPACITY);
        let (err_tx, err_rx) = oneshot::channel::<io::Error>();
        let prefix = self.prefix.clone();

        tokio::spawn(async move {
            if let Err(err) = self.write_to(writer).await {
                error!(
                    "ZIP stream error during object reading or writing for {}: {}",
                    prefix, err
                );
                let _ = err_tx.send(err);
            }
        });

        let failure = futures::stream::once(async move { err_rx.await.ok() })
            .filter_map(|err| async move { err.map(Err::<Bytes, io::Error>) });

        ReaderStream::new(reader).chain(failure).boxed()
    }
}

fn store_io_error(err: StoreError) -> io::Error {
    match err {
        StoreError::Io(err) => err,
        other => io::Error::other(other),
    }
}

/// Leaf folder name of a directory path, `archive` for the root.
fn extract_folder_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_ARCHIVE_NAME)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryObjectStore, ObjectStore, bytes_stream};
    use std::io::{Cursor, Read};
    use std::sync::Arc;

    const USER: UserId = UserId(42);

    async fn service(objects: &[(&str, &'static str)]) -> ArchiveService {
        service_with_store(objects).await.0
    }

    async fn service_with_store(
        objects: &[(&str, &'static str)],
    ) -> (ArchiveService, Arc<MemoryObjectStore>) {
        let store = Arc::new(MemoryObjectStore::new());
        store.ensure_bucket("user-files").await.unwrap();
        for (key, body) in objects {
            store
                .put("user-files", key, bytes_stream(*body), None, None)
                .await
                .unwrap();
        }
        let archives = ArchiveService::new(StoreContext::new(store.clone(), "user-files"));
        (archives, store)
    }

    /// Incompressible bytes, so the deflated entry is as large as the input.
    fn noise(len: usize) -> Vec<u8> {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    fn entries(bytes: Vec<u8>) -> Vec<(String, bool, String)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut content = String::new();
                file.read_to_string(&mut content).unwrap();
                (file.name().to_string(), file.is_dir(), content)
            })
            .collect()
    }

    #[test]
    fn folder_name_is_the_leaf_segment() {
        assert_eq!(extract_folder_name("docs/reports/"), "reports");
        assert_eq!(extract_folder_name("docs/"), "docs");
        assert_eq!(extract_folder_name("/"), "archive");
        assert_eq!(extract_folder_name(""), "archive");
    }

    #[tokio::test]
    async fn archives_files_and_empty_subdirectories() {
        let archives = service(&[
            ("user-42-files/proj/", ""),
            ("user-42-files/proj/empty/", ""),
            ("user-42-files/proj/f1.txt", "one"),
            ("user-42-files/proj/f2.txt", "two"),
            ("user-42-files/other.txt", "nope"),
        ])
        .await;

        let stream = archives.zip_directory_stream(USER, "proj/").await.unwrap();
        assert_eq!(stream.root_name(), "proj");
        let bytes = stream.write_to(Vec::new()).await.unwrap();

        let entries = entries(bytes);
        let dirs: Vec<_> = entries.iter().filter(|e| e.1).map(|e| e.0.as_str()).collect();
        let files: Vec<_> = entries
            .iter()
            .filter(|e| !e.1)
            .map(|e| (e.0.as_str(), e.2.as_str()))
            .collect();
        assert_eq!(dirs, vec!["proj/empty/"]);
        assert_eq!(files, vec![("proj/f1.txt", "one"), ("proj/f2.txt", "two")]);
    }

    #[tokio::test]
    async fn root_download_uses_default_name() {
        let archives = service(&[("user-42-files/a/b.txt", "b")]).await;

        let stream = archives.zip_directory_stream(USER, "/").await.unwrap();
        let bytes = stream.write_to(Vec::new()).await.unwrap();
        let names: Vec<_> = entries(bytes).into_iter().map(|e| e.0).collect();
        assert_eq!(names, vec!["archive/a/b.txt".to_string()]);
    }

    #[tokio::test]
    async fn missing_directory_fails_before_streaming() {
        let archives = service(&[]).await;
        assert!(matches!(
            archives.zip_directory_stream(USER, "ghost/").await,
            Err(StorageError::ResourceNotFound(_))
        ));
        assert!(matches!(
            archives.zip_directory_stream(USER, "file.txt").await,
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn byte_stream_yields_the_same_archive() {
        let archives = service(&[("user-42-files/d/x.txt", "payload")]).await;

        let mut stream = archives
            .zip_directory_stream(USER, "d/")
            .await
            .unwrap()
            .into_byte_stream();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }

        let entries = entries(bytes);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "d/x.txt");
        assert_eq!(entries[0].2, "payload");
    }

    #[tokio::test]
    async fn read_failure_mid_archive_ends_stream_with_error() {
        let (archives, store) = service_with_store(&[
            ("user-42-files/d/a.txt", "first file"),
            ("user-42-files/d/bad.txt", "this one breaks halfway"),
        ])
        .await;
        store.fail_reads_of("user-42-files/d/bad.txt").await;

        let items: Vec<io::Result<Bytes>> = archives
            .zip_directory_stream(USER, "d/")
            .await
            .unwrap()
            .into_byte_stream()
            .collect()
            .await;

        let (last, sent) = items.split_last().unwrap();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|chunk| chunk.is_ok()));
        let err = last.as_ref().unwrap_err();
        assert!(err.to_string().contains("bad.txt"));
        assert_eq!(store.open_readers(), 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_store_reader() {
        let (archives, store) = service_with_store(&[]).await;
        store
            .put(
                "user-files",
                "user-42-files/d/big.bin",
                bytes_stream(noise(1 << 20)),
                None,
                None,
            )
            .await
            .unwrap();

        let mut stream = archives
            .zip_directory_stream(USER, "d/")
            .await
            .unwrap()
            .into_byte_stream();
        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(store.open_readers(), 1);

        drop(stream);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while store.open_readers() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("writer task kept the store reader open");
    }
}
