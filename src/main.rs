use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use pdf_relay_gateway::config::RelayConfig;
use pdf_relay_gateway::services::relay::HttpRelayClient;
use pdf_relay_gateway::services::staging::StagingStore;
use pdf_relay_gateway::services::sweeper::StagingSweeper;
use pdf_relay_gateway::{AppState, create_app};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the API server (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Staging directory (overrides UPLOAD_DIR)
    #[arg(short, long)]
    upload_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & logging
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_relay_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting PDF Relay Gateway...");

    // 2. Configuration; a missing downstream URL is fatal
    let mut config = RelayConfig::from_env().context("refusing to start")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.upload_dir {
        config.upload_dir = dir;
    }
    let config = Arc::new(config);

    info!(
        "🛡️  Relay Config: Downstream={}, Max Size={}MB, Max Batch={}, Env={}",
        config.redacted_endpoint(),
        config.max_file_size_mb(),
        config.max_batch_files,
        config.environment
    );

    // 3. Staging and relay
    let staging = Arc::new(StagingStore::from_config(&config));
    staging
        .init()
        .await
        .context("failed to prepare staging directory")?;
    let relay = Arc::new(HttpRelayClient::new(&config).context("failed to build relay client")?);

    // 4. Sweeper, stopped through the shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = StagingSweeper::from_config(staging.clone(), &config, shutdown_rx);
    let sweeper_handle = tokio::spawn(sweeper.run());

    // 5. HTTP server
    let state = AppState::new(config.clone(), staging, relay);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ Server listening on: http://0.0.0.0:{}", config.port);
    info!("📖 OpenAPI document: http://localhost:{}/api-docs/openapi.json", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;

    info!("👋 PDF Relay Gateway exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
