use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use doip_server::config::{Cli, Config};
use doip_server::registry::Registry;
use doip_server::server;
use doip_server::state::AppState;
use doip_server::storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls CryptoProvider"))?;
    init_tracing();

    let cli = Cli::parse();
    let config = Arc::new(Config::load(&cli)?);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        fdo_api = %config.fdo_api,
        "doip-server starting"
    );

    let store = storage::from_settings(&config.lakefs).await;
    let registry = Arc::new(Registry::with_fdo_api(
        config.fdo_api.clone(),
        Arc::clone(&store),
    ));
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build reqwest client");
    let state = Arc::new(AppState {
        config,
        registry,
        store,
        http,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_handle = tokio::spawn(server::run(state, shutdown_rx));

    tokio::select! {
        // Fatal startup error (e.g. a port already in use) exits non-zero.
        result = &mut server_handle => {
            result??;
            anyhow::bail!("server stopped unexpectedly");
        }
        _ = wait_for_shutdown() => {
            info!("shutdown signal received, cleaning up...");
            let _ = shutdown_tx.send(true);
            server_handle.await??;
        }
    }

    info!("doip-server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
