//! Defines routes for the file store.
//!
//! ## Structure
//! - **By id**
//!   - `POST   /files?filename=` upload a new file
//!   - `GET    /files/{id}` download, optionally a single `Range`
//!   - `HEAD   /files/{id}` descriptor as headers only
//!   - `PATCH  /files/{id}?offset=` overwrite bytes in place
//!   - `DELETE /files/{id}` delete descriptor and chunks
//!
//! - **By checksum** (first match wins)
//!   - `GET    /checksums/{md5}` descriptor as JSON
//!   - `GET    /checksums/{md5}/content` download
//!   - `DELETE /checksums/{md5}` delete
//!
//! Health probes live at `/healthz` and `/readyz`.

use crate::{
    handlers::{
        file_handlers::{
            delete_by_checksum, delete_file, get_by_checksum, get_content_by_checksum, get_file,
            head_file, modify_file, upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router; every handler receives the shared `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files", post(upload_file))
        .route(
            "/files/{id}",
            get(get_file)
                .head(head_file)
                .patch(modify_file)
                .delete(delete_file),
        )
        .route(
            "/checksums/{md5}",
            get(get_by_checksum).delete(delete_by_checksum),
        )
        .route("/checksums/{md5}/content", get(get_content_by_checksum))
}
