//! Test helpers: build the real application on a temporary directory.
//!
//! Run from workspace root: `cargo test -p tusky-api`.

#![allow(dead_code)]

use axum::http::Method;
use axum_test::{TestResponse, TestServer};
use bytes::Bytes;
use std::sync::Arc;
use tempfile::TempDir;
use tusky_api::setup;
use tusky_api::AppState;
use tusky_core::{Config, UploadConfig};

pub const TUS: &str = "1.0.0";
pub const OFFSET_STREAM: &str = "application/offset+octet-stream";

/// Test application: server, state, and the directory backing it.
pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// TUS creation with a known length; returns the new id.
    pub async fn create_tus(&self, length: u64) -> String {
        let response = self
            .server
            .post("/files")
            .add_header("Tus-Resumable", TUS)
            .add_header("Upload-Length", length.to_string())
            .await;
        assert_eq!(response.status_code(), 201);
        id_from_location(&response)
    }

    pub async fn patch(&self, id: &str, offset: u64, data: &[u8]) -> TestResponse {
        self.server
            .patch(&format!("/files/{}", id))
            .add_header("Tus-Resumable", TUS)
            .add_header("Upload-Offset", offset.to_string())
            .content_type(OFFSET_STREAM)
            .bytes(Bytes::copy_from_slice(data))
            .await
    }

    pub async fn tus_head(&self, id: &str) -> TestResponse {
        self.server
            .method(Method::HEAD, &format!("/files/{}", id))
            .add_header("Tus-Resumable", TUS)
            .await
    }

    pub async fn metadata(&self, id: &str) -> TestResponse {
        self.server.get(&format!("/files/{}/metadata", id)).await
    }
}

pub fn id_from_location(response: &TestResponse) -> String {
    let location = response.header("location");
    let location = location.to_str().expect("Location is ASCII");
    location
        .strip_prefix("/files/")
        .expect("Location under /files/")
        .to_string()
}

pub fn header_str(response: &TestResponse, name: &str) -> String {
    response
        .header(name)
        .to_str()
        .expect("header is ASCII")
        .to_string()
}

/// Setup test app with default limits and local storage.
pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(|_| {}).await
}

/// Setup test app after adjusting the configuration.
pub async fn setup_test_app_with(customize: impl FnOnce(&mut UploadConfig)) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let mut upload = UploadConfig::local(temp_dir.path().to_string_lossy().to_string());
    customize(&mut upload);

    let (state, router) = setup::initialize_app(Config(Box::new(upload)))
        .await
        .expect("Failed to initialize app");
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        state,
        _temp_dir: temp_dir,
    }
}
