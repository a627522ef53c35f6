//! Trellis sync server.
//!
//! Serves canvas, workflow and project documents over WebSocket. Settings
//! come from `TRELLIS_*` environment variables; `RUST_LOG` controls logging.

mod config;

use log::{error, info};
use trellis_sync::SyncServer;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = config::load_config();
    match &config.storage_path {
        Some(path) => info!("Persisting documents under {}", path.display()),
        None => info!("No TRELLIS_STORAGE_PATH set, documents are kept in memory"),
    }

    let server = match SyncServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
