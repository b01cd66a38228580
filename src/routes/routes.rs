//! Defines routes for both upload protocols and file streaming.
//!
//! ## Structure
//! - **Resumable (tus) endpoints**, behind the `Tus-Resumable` check
//!   - `OPTIONS /files`, `/files/{id}` - capability discovery
//!   - `POST    /files`      - create upload
//!   - `HEAD    /files/{id}` - current offset
//!   - `PATCH   /files/{id}` - append bytes
//!   - `DELETE  /files/{id}` - terminate
//!
//! - **Chunked endpoints**
//!   - `POST    /uploads`                   - init
//!   - `PUT     /uploads/{id}/chunks/{idx}` - store one chunk
//!   - `GET     /uploads/{id}/status`       - received / missing chunks
//!   - `POST    /uploads/{id}/commit`       - assemble
//!   - `DELETE  /uploads/{id}`              - cancel
//!
//! - **Streaming**
//!   - `GET     /uploads/{filename}` - whole file or a single byte range
//!
//! `GET` and `DELETE` on `/uploads/{id}` share one path: the segment is a
//! filename for `GET` and an upload id for `DELETE`.

use crate::{
    handlers::{
        chunk_handlers::{cancel_upload, commit_upload, init_upload, put_chunk, upload_status},
        health_handlers::{healthz, readyz},
        media_handlers::stream_file,
        tus_handlers::{
            append_upload, create_upload, options, terminate_upload, tus_protocol, upload_info,
        },
    },
    state::AppState,
};
use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

/// Build the full application router with its state attached.
pub fn routes(state: AppState) -> Router {
    let tus = Router::new()
        .route("/files", post(create_upload).options(options))
        .route(
            "/files/{id}",
            axum::routing::head(upload_info)
                .patch(append_upload)
                .delete(terminate_upload)
                .options(options),
        )
        .layer(middleware::from_fn_with_state(state.clone(), tus_protocol));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(tus)
        .route("/uploads", post(init_upload))
        .route("/uploads/{id}", get(stream_file).delete(cancel_upload))
        .route("/uploads/{id}/chunks/{idx}", put(put_chunk))
        .route("/uploads/{id}/status", get(upload_status))
        .route("/uploads/{id}/commit", post(commit_upload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
