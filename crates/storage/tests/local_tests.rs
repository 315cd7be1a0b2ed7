//! Local filesystem backend behaviour.

use futures::StreamExt;
use tracklab_storage::{ArtifactStore, LocalStorage, StorageError};

async fn collect(mut stream: tracklab_storage::ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn get_streams_file_content() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("model")).unwrap();
    std::fs::write(dir.path().join("model/weights.bin"), b"abc123").unwrap();

    let storage = LocalStorage::new();
    let uri = dir.path().display().to_string();
    let body = collect(storage.get(&uri, "model/weights.bin").await.unwrap()).await;
    assert_eq!(body, b"abc123");
}

#[tokio::test]
async fn get_missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new();
    let uri = dir.path().display().to_string();
    let err = match storage.get(&uri, "nope.txt").await {
        Err(err) => err,
        Ok(_) => panic!("expected error"),
    };
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn list_returns_files_and_directories() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("model")).unwrap();
    std::fs::write(dir.path().join("metrics.txt"), b"x").unwrap();
    std::fs::write(dir.path().join("model/weights.bin"), b"abcd").unwrap();

    let storage = LocalStorage::new();
    let uri = format!("file://{}", dir.path().display());

    let objects = storage.list(&uri, "").await.unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].path, "metrics.txt");
    assert_eq!(objects[0].size, Some(1));
    assert!(!objects[0].is_dir);
    assert_eq!(objects[1].path, "model");
    assert!(objects[1].is_dir);
    assert_eq!(objects[1].size, None);

    let nested = storage.list(&uri, "model").await.unwrap();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].path, "model/weights.bin");
    assert_eq!(nested[0].size, Some(4));
}

#[tokio::test]
async fn list_missing_path_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new();
    let uri = dir.path().display().to_string();
    assert!(storage.list(&uri, "missing").await.unwrap().is_empty());
}

#[tokio::test]
async fn traversal_is_rejected_for_get_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new();
    let uri = dir.path().display().to_string();

    let err = match storage.get(&uri, "foo/../bar").await {
        Err(err) => err,
        Ok(_) => panic!("expected error"),
    };
    assert!(matches!(err, StorageError::InvalidPath(_)));
    let err = storage.list(&uri, "foo/../bar").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidPath(_)));
}
