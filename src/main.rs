mod client;
mod config;
mod downloads;
mod error;
mod processor;
mod response;
mod scanner;
mod state;
mod tasks;
mod tracker;
mod watcher;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::TorBoxClient;
use crate::config::Settings;
use crate::processor::FileProcessor;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            tracing_subscriber::fmt().init();
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(&settings.log_level)
        .init();

    info!("Initializing TorBox Watcher");

    for dir in [&settings.watch_dir, &settings.download_dir] {
        if !dir.exists()
            && let Err(e) = std::fs::create_dir_all(dir)
        {
            error!("Failed to create directory {:?}: {}", dir, e);
        }
    }

    let client = match TorBoxClient::new(&settings) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build API client: {}", e);
            std::process::exit(1);
        }
    };
    let processor = match FileProcessor::new(&settings) {
        Ok(processor) => processor,
        Err(e) => {
            error!("Failed to build download client: {}", e);
            std::process::exit(1);
        }
    };

    info!("API base URL: {}", client.api_base());
    info!("Watch directory: {:?}", settings.watch_dir);
    info!("Download directory: {:?}", settings.download_dir);
    info!("Watch interval: {} seconds", settings.watch_interval);
    info!("Check interval: {} seconds", settings.check_interval);
    info!(
        "Progress update interval: {} seconds",
        settings.progress_interval().as_secs()
    );

    let state = AppState::new(settings, client, processor);
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    tasks::run(state, shutdown).await;
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt. Shutting down..."),
        _ = terminate => info!("Received SIGTERM. Shutting down..."),
    }
    shutdown.cancel();
}
