//! TUS 1.0.0 protocol tests.
//!
//! Run with: `cargo test -p tusky-api --test tus_test`

mod helpers;

use axum::http::Method;
use axum_test::TestResponse;
use futures::future::join_all;
use helpers::{header_str, id_from_location, setup_test_app, setup_test_app_with, OFFSET_STREAM, TUS};
use serde_json::Value;
use std::time::Duration;

#[tokio::test]
async fn test_two_chunks_complete_declared_upload() {
    let app = setup_test_app().await;
    let client = app.client();

    // Explicit id, size 1024, nothing written yet.
    let response = client
        .put("/files/abc123")
        .add_header("Content-Range", "bytes */1024")
        .await;
    assert_eq!(response.status_code(), 201);

    let first = vec![b'a'; 500];
    let second = vec![b'b'; 524];

    let response = app.patch("abc123", 0, &first).await;
    assert_eq!(response.status_code(), 204);
    assert_eq!(header_str(&response, "upload-offset"), "500");
    assert_eq!(header_str(&response, "tus-resumable"), TUS);

    let response = app.patch("abc123", 500, &second).await;
    assert_eq!(response.status_code(), 204);
    assert_eq!(header_str(&response, "upload-offset"), "1024");

    let record: Value = app.metadata("abc123").await.json();
    assert_eq!(record["id"], "abc123");
    assert_eq!(record["size"], 1024);
    assert_eq!(record["bytesWritten"], 1024);
    assert_eq!(record["status"], "completed");

    let download = client.get("/files/abc123").await;
    assert_eq!(download.status_code(), 200);
    let mut expected = first;
    expected.extend_from_slice(&second);
    assert_eq!(download.as_bytes().to_vec(), expected);
}

#[tokio::test]
async fn test_creation_metadata_and_head() {
    let app = setup_test_app().await;
    let client = app.client();

    // filename=hello.txt, filetype=text/plain
    let response = client
        .post("/files")
        .add_header("Tus-Resumable", TUS)
        .add_header("Upload-Length", "11")
        .add_header(
            "Upload-Metadata",
            "filename aGVsbG8udHh0,filetype dGV4dC9wbGFpbg==",
        )
        .await;
    assert_eq!(response.status_code(), 201);
    assert_eq!(header_str(&response, "tus-resumable"), TUS);
    let id = id_from_location(&response);

    let head = app.tus_head(&id).await;
    assert_eq!(head.status_code(), 200);
    assert_eq!(header_str(&head, "upload-offset"), "0");
    assert_eq!(header_str(&head, "upload-length"), "11");
    assert_eq!(header_str(&head, "cache-control"), "no-store");
    assert!(header_str(&head, "upload-metadata").contains("filename aGVsbG8udHh0"));

    let response = app.patch(&id, 0, b"hello world").await;
    assert_eq!(response.status_code(), 204);
    assert_eq!(header_str(&response, "upload-offset"), "11");

    let record: Value = app.metadata(&id).await.json();
    assert_eq!(record["status"], "completed");
    assert_eq!(record["name"], "hello.txt");
    assert_eq!(record["contentType"], "text/plain");
    assert_eq!(record["metadata"]["filename"], "hello.txt");
}

#[tokio::test]
async fn test_offset_mismatch_changes_nothing() {
    let app = setup_test_app().await;
    let id = app.create_tus(10).await;

    assert_eq!(app.patch(&id, 0, b"hello").await.status_code(), 204);

    let conflict = app.patch(&id, 0, b"XXXXX").await;
    assert_eq!(conflict.status_code(), 409);
    let body: Value = conflict.json();
    assert_eq!(body["code"], "OFFSET_CONFLICT");

    let head = app.tus_head(&id).await;
    assert_eq!(header_str(&head, "upload-offset"), "5");

    assert_eq!(app.patch(&id, 5, b"world").await.status_code(), 204);
    let download = app.client().get(&format!("/files/{}", id)).await;
    assert_eq!(download.as_bytes().as_ref(), b"helloworld");
}

#[tokio::test]
async fn test_unsupported_version_is_rejected() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .post("/files")
        .add_header("Tus-Resumable", "0.2.2")
        .add_header("Upload-Length", "10")
        .await;
    assert_eq!(response.status_code(), 412);
    assert_eq!(header_str(&response, "tus-version"), TUS);

    let list: Value = app.client().get("/files").await.json();
    assert_eq!(list["items"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_patch_requires_offset_stream_and_offset() {
    let app = setup_test_app().await;
    let id = app.create_tus(4).await;

    let response = app
        .client()
        .patch(&format!("/files/{}", id))
        .add_header("Tus-Resumable", TUS)
        .add_header("Upload-Offset", "0")
        .content_type("application/octet-stream")
        .bytes("data".into())
        .await;
    assert_eq!(response.status_code(), 415);

    let response = app
        .client()
        .patch(&format!("/files/{}", id))
        .add_header("Tus-Resumable", TUS)
        .content_type(OFFSET_STREAM)
        .bytes("data".into())
        .await;
    assert_eq!(response.status_code(), 400);

    let response = app
        .client()
        .patch(&format!("/files/{}", id))
        .add_header("Tus-Resumable", TUS)
        .add_header("Upload-Offset", "zero")
        .content_type(OFFSET_STREAM)
        .bytes("data".into())
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_checksum_mismatch_is_460() {
    let app = setup_test_app().await;
    let id = app.create_tus(11).await;

    let patch_with = |checksum: &'static str| {
        app.client()
            .patch(&format!("/files/{}", id))
            .add_header("Tus-Resumable", TUS)
            .add_header("Upload-Offset", "0")
            .add_header("Upload-Checksum", checksum)
            .content_type(OFFSET_STREAM)
            .bytes("hello world".into())
    };

    let response = patch_with("sha1 AAAAAAAAAAAAAAAAAAAAAAAAAAA=").await;
    assert_eq!(response.status_code(), 460);
    assert_eq!(header_str(&app.tus_head(&id).await, "upload-offset"), "0");

    let response = patch_with("crc32 AAAA").await;
    assert_eq!(response.status_code(), 400);

    let response = patch_with("sha1 Kq5sNclPz7QV2+lfQIuc6R7oRu0=").await;
    assert_eq!(response.status_code(), 204);
    assert_eq!(header_str(&response, "upload-offset"), "11");
}

#[tokio::test]
async fn test_deferred_length_is_fixed_by_patch() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .post("/files")
        .add_header("Tus-Resumable", TUS)
        .add_header("Upload-Defer-Length", "1")
        .await;
    assert_eq!(response.status_code(), 201);
    let id = id_from_location(&response);

    let head = app.tus_head(&id).await;
    assert_eq!(header_str(&head, "upload-defer-length"), "1");
    assert!(head.maybe_header("upload-length").is_none());

    let response = app
        .client()
        .patch(&format!("/files/{}", id))
        .add_header("Tus-Resumable", TUS)
        .add_header("Upload-Offset", "0")
        .add_header("Upload-Length", "6")
        .content_type(OFFSET_STREAM)
        .bytes("abc".into())
        .await;
    assert_eq!(response.status_code(), 204);

    assert_eq!(app.patch(&id, 3, b"def").await.status_code(), 204);
    let record: Value = app.metadata(&id).await.json();
    assert_eq!(record["size"], 6);
    assert_eq!(record["status"], "completed");
}

#[tokio::test]
async fn test_zero_length_upload_completes_on_creation() {
    let app = setup_test_app().await;
    let id = app.create_tus(0).await;

    let record: Value = app.metadata(&id).await.json();
    assert_eq!(record["status"], "completed");
    assert_eq!(record["bytesWritten"], 0);

    let download = app.client().get(&format!("/files/{}", id)).await;
    assert_eq!(download.status_code(), 200);
    assert!(download.as_bytes().is_empty());
}

#[tokio::test]
async fn test_creation_with_upload() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .post("/files")
        .add_header("Tus-Resumable", TUS)
        .add_header("Upload-Length", "5")
        .content_type(OFFSET_STREAM)
        .bytes("hello".into())
        .await;
    assert_eq!(response.status_code(), 201);
    assert_eq!(header_str(&response, "upload-offset"), "5");

    let id = id_from_location(&response);
    let record: Value = app.metadata(&id).await.json();
    assert_eq!(record["status"], "completed");
}

#[tokio::test]
async fn test_options_advertises_capabilities() {
    let app = setup_test_app().await;

    let response = app.client().method(Method::OPTIONS, "/files").await;
    assert_eq!(response.status_code(), 204);
    assert_eq!(header_str(&response, "tus-version"), TUS);
    assert_eq!(header_str(&response, "tus-resumable"), TUS);
    assert_eq!(header_str(&response, "tus-checksum-algorithm"), "sha1,sha256");
    assert!(header_str(&response, "tus-extension").contains("creation-defer-length"));
    assert_eq!(
        header_str(&response, "tus-max-size"),
        (5u64 * 1024 * 1024 * 1024).to_string()
    );
    assert!(header_str(&response, "allow").contains("POST"));
}

#[tokio::test]
async fn test_upload_expires_is_advertised_with_ttl() {
    let app = setup_test_app_with(|config| config.ttl = Some(Duration::from_secs(3600))).await;
    let id = app.create_tus(4).await;

    let head = app.tus_head(&id).await;
    assert!(header_str(&head, "upload-expires").ends_with("GMT"));

    let response = app.patch(&id, 0, b"ab").await;
    assert!(response.maybe_header("upload-expires").is_some());
}

#[tokio::test]
async fn test_concurrent_chunks_are_serialized() {
    let app = setup_test_app().await;
    const CHUNK: usize = 64;
    const CHUNKS: usize = 8;
    let id = app.create_tus((CHUNK * CHUNKS) as u64).await;

    let chunks: Vec<Vec<u8>> = (0..CHUNKS).map(|i| vec![b'a' + i as u8; CHUNK]).collect();

    // Latest offsets first, so most requests have to wait for a predecessor.
    let requests = chunks
        .iter()
        .enumerate()
        .rev()
        .map(|(i, chunk)| app.patch(&id, (i * CHUNK) as u64, chunk));
    let responses: Vec<TestResponse> = join_all(requests).await;
    for response in &responses {
        assert_eq!(response.status_code(), 204);
    }

    let record: Value = app.metadata(&id).await.json();
    assert_eq!(record["bytesWritten"], (CHUNK * CHUNKS) as u64);
    assert_eq!(record["status"], "completed");

    let download = app.client().get(&format!("/files/{}", id)).await;
    assert_eq!(download.as_bytes().to_vec(), chunks.concat());
}

#[tokio::test]
async fn test_termination() {
    let app = setup_test_app().await;
    let id = app.create_tus(4).await;

    let response = app
        .client()
        .delete(&format!("/files/{}", id))
        .add_header("Tus-Resumable", TUS)
        .await;
    assert_eq!(response.status_code(), 204);
    assert_eq!(app.tus_head(&id).await.status_code(), 404);
}
