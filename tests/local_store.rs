//! The facade over the durable SQLite + disk store.

use bytes::Bytes;
use cloud_storage::{
    models::{ResourceType, UserId},
    services::{Download, StorageError, StorageService, UploadFile},
    store::{LocalObjectStore, ObjectStore, bytes_stream},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const BUCKET: &str = "user-files";
const USER: UserId = UserId(42);

async fn setup(dir: &tempfile::TempDir) -> StorageService {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = LocalObjectStore::new(Arc::new(pool), dir.path());
    store.migrate().await.unwrap();
    store.ensure_bucket(BUCKET).await.unwrap();
    StorageService::new(Arc::new(store), BUCKET)
}

fn upload(name: &str, content: &'static str) -> UploadFile<'static> {
    UploadFile {
        filename: name.to_string(),
        content_type: None,
        size: Some(content.len() as u64),
        body: bytes_stream(Bytes::from_static(content.as_bytes())),
    }
}

#[tokio::test]
async fn files_and_directories_survive_a_round_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let service = setup(&dir).await;

    service.create_directory(USER, "p/").await.unwrap();
    service
        .upload(USER, "p/", vec![upload("x.txt", "contents")])
        .await
        .unwrap();

    let info = service.resource_info(USER, "p/x.txt").await.unwrap();
    assert_eq!(info.size, Some(8));
    assert_eq!(info.resource_type, ResourceType::File);

    let Download::File(mut reader) = service.download(USER, "p/x.txt").await.unwrap() else {
        panic!("expected a file download");
    };
    let mut out = String::new();
    reader.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "contents");

    let names: Vec<String> = service
        .list_directory(USER, "p/")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["x.txt".to_string()]);

    service.move_resource(USER, "p/", "q/").await.unwrap();
    assert!(matches!(
        service.resource_info(USER, "p/").await,
        Err(StorageError::ResourceNotFound(_))
    ));
    assert_eq!(
        service.resource_info(USER, "q/x.txt").await.unwrap().size,
        Some(8)
    );

    service.delete_resource(USER, "q/").await.unwrap();
    assert!(service.list_directory(USER, "/").await.unwrap().is_empty());
}

#[tokio::test]
async fn underscores_in_names_do_not_widen_prefix_matches() {
    let dir = tempfile::tempdir().unwrap();
    let service = setup(&dir).await;

    service
        .upload(USER, "a_b/", vec![upload("one.txt", "1")])
        .await
        .unwrap();
    service
        .upload(USER, "axb/", vec![upload("two.txt", "2")])
        .await
        .unwrap();

    service.delete_resource(USER, "a_b/").await.unwrap();
    assert_eq!(
        service.resource_info(USER, "axb/two.txt").await.unwrap().name,
        "two.txt"
    );
}
