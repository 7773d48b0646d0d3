//! Axum server setup and router construction.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::api::{self, AppState};
use crate::relay;

/// Multipart framing allowance on top of the upload ceiling.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Build the full axum router.
///
/// The router serves:
/// - the chat relay at `/api/chat`
/// - uploads at `/api/upload` and the datasource table at `/api/datasources`
/// - optional static files for the frontend production build
pub fn build_router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    // CORS layer for development (Next.js dev server on a different port).
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit =
        usize::try_from(state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD))
            .unwrap_or(usize::MAX);

    let api_routes = Router::new()
        .route("/api/chat", post(relay::post_chat))
        .route(
            "/api/upload",
            post(api::post_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/datasources", get(api::get_datasources))
        .with_state(state);

    let mut router = api_routes
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Serve static files (frontend export) in production mode.
    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
}

/// Bind `bind_addr`, start serving `router` on a Tokio task, and return the
/// bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Relay server stopped: {e}");
        }
    });

    Ok(addr)
}
