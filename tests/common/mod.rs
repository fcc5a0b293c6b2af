//! Shared setup for the API integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use bytes::Bytes;
use codedrop::auth::{Hasher, TokenIssuer};
use codedrop::config::AccessMode;
use codedrop::db::Database;
use codedrop::storage::{LocalStorage, ObjectStore, StorageError, StoredObject};
use codedrop::{app, AppState};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const JWT_SECRET: &str = "test-secret-key-for-testing-only";

/// Object store double that remembers how often it was called.
#[derive(Default)]
pub struct RecordingStore {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn store(
        &self,
        data: Bytes,
        file_name: &str,
        _mime_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StorageError::UploadFailed("bucket unavailable".into()));
        }
        Ok(StoredObject {
            url: format!("https://cdn.example.com/{}/{}?size={}", n, file_name, data.len()),
            object_id: format!("object-{}", n),
        })
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

fn state(mode: AccessMode, storage: Arc<dyn ObjectStore>) -> AppState {
    AppState::new(
        mode,
        Database::open_in_memory().expect("in-memory database"),
        Hasher::new(4),
        TokenIssuer::new(JWT_SECRET),
        storage,
    )
}

pub fn server_with_store(mode: AccessMode, storage: Arc<dyn ObjectStore>) -> TestServer {
    TestServer::new(app(state(mode, storage), None)).expect("test server")
}

/// Server backed by real local storage in a temp dir. Keep the dir alive.
pub async fn server_with_local_files(mode: AccessMode) -> (TestServer, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let local = Arc::new(
        LocalStorage::new(dir.path(), "http://localhost:5000")
            .await
            .expect("local storage"),
    );
    let state = state(mode, local.clone()).with_local_files(local);
    let server = TestServer::new(app(state, None)).expect("test server");
    (server, dir)
}

pub async fn signup(server: &TestServer, pin: &str) -> String {
    let response = server
        .post("/api/auth/signup")
        .json(&json!({ "pin": pin }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    response.json::<Value>()["token"]
        .as_str()
        .expect("token")
        .to_string()
}

pub fn upload_form(name: &str, code: &str, file_name: &str, contents: Vec<u8>) -> MultipartForm {
    MultipartForm::new()
        .add_text("name", name.to_string())
        .add_text("code", code.to_string())
        .add_part(
            "file",
            Part::bytes(contents)
                .file_name(file_name.to_string())
                .mime_type("text/plain"),
        )
}
