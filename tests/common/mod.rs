#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response},
};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use upload_store::{db, routes::routes::routes, state::AppState};

pub const TUS: &str = "1.0.0";
pub const OWNER: &str = "8a6e0804-2bd0-4672-b79d-d97027f9071a";

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let temp_dir = dir.path().join("tmp");
        let final_dir = dir.path().join("final");
        std::fs::create_dir_all(&temp_dir).unwrap();
        std::fs::create_dir_all(&final_dir).unwrap();

        let url = format!("sqlite://{}", dir.path().join("uploads.db").display());
        let pool = db::connect(&url, 5).await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let state = AppState::new(Arc::new(pool), &temp_dir, &final_dir, TUS);
        let router = routes(state.clone());
        Self { dir, state, router }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
