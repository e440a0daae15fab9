use axum::{response::IntoResponse, Json};
use serde_json::json;

/// Undocumented root: status plus pointers for humans poking around.
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "docs": "/docs",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": crate::api::GIT_COMMIT_HASH,
    }))
}
