//! HTTP relay for the zams dashboard.
//!
//! `zams-web` is an axum server that sits between the browser and the
//! completion provider. It assembles context for each chat request, streams
//! the provider's fragments back as `data:` event blocks, and serves the
//! upload and datasource endpoints the dashboard uses.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use zams_rs::prelude::*;
//! use zams_web::{WebConfig, spawn_web};
//!
//! let provider = Arc::new(CompletionClient::from_env()?);
//! let datasources = Arc::new(InMemoryDatasources::demo());
//!
//! let addr = spawn_web(provider, datasources, WebConfig::default()).await?;
//! println!("Relay: http://{addr}");
//! ```
//!
//! # Endpoints
//!
//! ```text
//! POST /api/chat         {messages, responseType?, includeDatasources?}
//!                        ──▶ text/event-stream: data: {"content"} … data: [DONE] | data: {"error"}
//! POST /api/upload       multipart field `file` (≤ 5 MiB) ──▶ {success, filename, size, type}
//! GET  /api/datasources  ?search&type&status&sort&direction ──▶ [Datasource]
//! ```
//!
//! Every request is independent. The only state shared between requests is
//! the provider handle and the read-only datasource source.

mod api;
pub mod relay;
mod server;

pub use api::AppState;
pub use server::{build_router, start_server};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use zams_rs::MAX_UPLOAD_BYTES;
use zams_rs::context::DatasourceSource;
use zams_rs::provider::CompletionProvider;

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
    /// Path to the exported dashboard frontend.
    ///
    /// If `None`, only the API endpoints are served and the frontend runs
    /// separately (e.g., `next dev` on port 3000).
    pub static_dir: Option<PathBuf>,
    /// Largest accepted upload in bytes. Default: [`MAX_UPLOAD_BYTES`].
    pub max_upload_bytes: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            static_dir: None,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

/// Spawn the relay on a Tokio task and return the bound address.
///
/// The server runs until the Tokio runtime shuts down.
pub async fn spawn_web(
    provider: Arc<dyn CompletionProvider>,
    datasources: Arc<dyn DatasourceSource>,
    config: WebConfig,
) -> std::io::Result<SocketAddr> {
    let state = AppState {
        provider,
        datasources,
        max_upload_bytes: config.max_upload_bytes,
    };
    let router = build_router(state, config.static_dir);
    start_server(router, config.bind_addr).await
}
