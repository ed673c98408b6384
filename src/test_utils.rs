//! Shared fixtures for unit tests.

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::io::Cursor;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::db;
use crate::images::ImageStore;
use crate::AppState;

/// Single-connection in-memory database with the schema applied.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Image store in a fresh temporary directory. Keep the `TempDir` alive.
pub async fn test_store() -> (ImageStore, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = ImageStore::open(dir.path())
        .await
        .expect("Failed to open image store");
    (store, dir)
}

pub async fn test_state() -> (AppState, TempDir) {
    let pool = test_pool().await;
    let (store, dir) = test_store().await;
    (AppState::new(pool, store), dir)
}

/// A solid-colour PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 90]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("Failed to encode PNG");
    buf
}

/// Files currently in the store directory. Files in subdirectories (the
/// staging area) are listed as `<dir>/<name>`.
pub fn stored_files(dir: &TempDir) -> Vec<String> {
    fn collect(path: &std::path::Path, prefix: &str, names: &mut Vec<String>) {
        for entry in std::fs::read_dir(path)
            .expect("Failed to read store dir")
            .filter_map(|e| e.ok())
        {
            let name = format!("{}{}", prefix, entry.file_name().to_string_lossy());
            if entry.path().is_dir() {
                collect(&entry.path(), &format!("{}/", name), names);
            } else {
                names.push(name);
            }
        }
    }

    let mut names = Vec::new();
    collect(dir.path(), "", &mut names);
    names.sort();
    names
}

/// Builds `multipart/form-data` request bodies.
pub struct MultipartBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self {
            boundary: "----case-backend-test-boundary".to_string(),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                self.boundary, name, file_name
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn request(mut self, method: &str, uri: &str) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Request::builder()
            .method(method)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", self.boundary),
            )
            .body(Body::from(self.body))
            .unwrap()
    }
}

pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes)
}
