use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::FutureExt;

use modelx_storage::Storage;
use modelx_types::ErrorInfo;

use crate::handlers;
use crate::store::RegistryStore;

/// Manifest PUT bodies are capped at 1 MiB.
pub const MAX_MANIFEST_BYTES: usize = 1 << 20;

/// Builder for the registry HTTP service.
///
/// ```no_run
/// use modelx_registry::RegistryBuilder;
/// use modelx_storage::{FsProvider, Storage};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = Storage::new(FsProvider::new("data/registry")?);
/// let router = RegistryBuilder::new().storage(storage).build().await?;
/// // serve with axum
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    storage: Option<Storage>,
    enable_redirect: bool,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Allow the service to redirect bulk blob I/O to object storage via
    /// pre-signed URLs (requires a capable backend).
    pub fn enable_redirect(mut self, enable: bool) -> Self {
        self.enable_redirect = enable;
        self
    }

    /// Build the service, refreshing the global index from storage.
    pub async fn build(self) -> Result<Router, ErrorInfo> {
        let storage = self.storage.expect("storage backend must be configured");
        let store = RegistryStore::new(storage, self.enable_redirect).await?;
        Ok(router(Arc::new(store)))
    }
}

/// The fixed route grammar of the registry protocol.
pub fn router(store: Arc<RegistryStore>) -> Router {
    Router::new()
        .route("/", get(handlers::get_global_index))
        .route(
            "/:repository/:name/index",
            get(handlers::get_index).delete(handlers::delete_index),
        )
        .route(
            "/:repository/:name/garbage-collect",
            post(handlers::garbage_collect),
        )
        .route(
            "/:repository/:name/manifests/:reference",
            get(handlers::get_manifest)
                .head(handlers::head_manifest)
                .put(handlers::put_manifest)
                .delete(handlers::delete_manifest)
                .layer(DefaultBodyLimit::max(MAX_MANIFEST_BYTES)),
        )
        .route(
            "/:repository/:name/blobs/:digest",
            get(handlers::get_blob)
                .head(handlers::head_blob)
                .put(handlers::put_blob)
                .layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/:repository/:name/blobs/:digest/locations/:purpose",
            get(handlers::get_blob_location),
        )
        .layer(middleware::from_fn(recover_panics))
        .layer(middleware::from_fn(trace_requests))
        .with_state(store)
}

async fn trace_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    tracing::info!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Recover handler panics into a bare 500 instead of tearing the connection
/// down.
async fn recover_panics(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    match std::panic::AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(%method, path, panic = %message, "handler panicked");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
