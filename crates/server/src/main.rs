//! PdfAsk Server - Main Entry Point

use clap::Parser;
use pdfask_common::PdfAskConfig;
use pdfask_server::{create_router, AppState};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pdfask-server",
    about = "Ask questions about a PDF using a local language model",
    version = env!("CARGO_PKG_VERSION")
)]
struct ServerArgs {
    /// YAML configuration file
    #[arg(short, long, env = "PDFASK_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    let mut config = PdfAskConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.bind_address = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    init_tracing(&config);

    info!("Starting PdfAsk server");
    info!(
        "Active model: {} ({} models configured), uploads in {}",
        config.models.default_model,
        config.models.entries.len(),
        config.upload.dir.display()
    );

    let addr = config.listen_address();
    let state = AppState::new(config)?;
    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Backend server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("PdfAsk server shutdown complete");
    Ok(())
}

fn init_tracing(config: &PdfAskConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "pdfask_server={level},pdfask_supervisor={level},tower_http={level}",
            level = config.observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.structured_logging {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for Ctrl+C or SIGTERM, then cancel every in-flight session
async fn shutdown_signal(sessions: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }

    sessions.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_parse() {
        let args =
            ServerArgs::try_parse_from(["pdfask-server", "--host", "127.0.0.1", "--port", "9000"])
                .unwrap();

        assert_eq!(args.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(args.port, Some(9000));
    }
}
