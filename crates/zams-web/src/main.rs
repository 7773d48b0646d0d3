//! The zams relay server.
//!
//! Streams completions from an OpenAI-compatible provider (Groq by default)
//! to the dashboard. Reads the API key from the `GROQ_API_KEY` environment
//! variable.
//!
//! # Usage
//!
//! ```bash
//! GROQ_API_KEY=gsk-... cargo run -p zams-web
//! GROQ_API_KEY=gsk-... cargo run -p zams-web -- --port 8080 --static-dir web/out
//! GROQ_API_KEY=gsk-... cargo run -p zams-web -- --datasources datasources.json
//! ```
//!
//! Then chat from the dashboard, or with `curl -N`:
//!
//! ```bash
//! curl -N -X POST localhost:3001/api/chat \
//!   -H 'content-type: application/json' \
//!   -d '{"messages":[{"role":"user","content":"How many PDFs are there?"}]}'
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zams_rs::context::InMemoryDatasources;
use zams_rs::provider::{CompletionClient, ProviderConfig, RetryConfig};
use zams_rs::{API_KEY_ENV, DEFAULT_MODEL, GROQ_BASE_URL};
use zams_web::{WebConfig, spawn_web};

/// Datasource-grounded chat relay.
#[derive(Parser)]
#[command(about = "Streaming chat relay for the zams dashboard")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Directory holding the exported frontend, served as a fallback.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Completion model.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// OpenAI-compatible API base URL.
    #[arg(long, default_value = GROQ_BASE_URL)]
    base_url: String,

    /// Retries for a completion request that fails before streaming starts.
    #[arg(long, default_value_t = 0)]
    max_retries: u32,

    /// JSON file of datasource records. Without this, the demo table is used.
    #[arg(long)]
    datasources: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Completion provider.
    let api_key = std::env::var(API_KEY_ENV)
        .map_err(|_| format!("Set {API_KEY_ENV} env var to your provider API key"))?;
    let provider = CompletionClient::with_config(ProviderConfig {
        base_url: args.base_url,
        model: args.model,
        api_key,
        retry: RetryConfig::with_retries(args.max_retries),
        ..Default::default()
    })
    .map_err(|e| e.to_string())?;
    info!(
        "Provider: {} ({})",
        provider.config().model,
        provider.config().base_url
    );

    // 2. Datasource snapshot source.
    let datasources = match &args.datasources {
        Some(path) => InMemoryDatasources::from_json_file(path)
            .map_err(|e| format!("{}: {e}", path.display()))?,
        None => InMemoryDatasources::demo(),
    };
    info!("Datasources: {} records", datasources.records().len());

    // 3. Serve.
    let config = WebConfig {
        bind_addr: SocketAddr::new(args.bind, args.port),
        static_dir: args.static_dir,
        ..Default::default()
    };
    let addr = spawn_web(Arc::new(provider), Arc::new(datasources), config)
        .await
        .map_err(|e| format!("failed to bind: {e}"))?;
    println!("Relay: http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to wait for Ctrl-C: {e}"))?;
    info!("Shutting down");
    Ok(())
}
