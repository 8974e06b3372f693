//! Server commands: `aios serve` and `aios init-db`.

use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

use aios::config::AiosConfig;
use aios::desktop::server::{self, ServerConfig};

/// Command-line values that take precedence over the loaded configuration.
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub dev: bool,
    pub open: bool,
}

pub async fn cmd_serve(config: AiosConfig, overrides: ServeOverrides) -> Result<()> {
    let mut server_config = ServerConfig::from(&config);
    if let Some(port) = overrides.port {
        server_config.port = port;
    }
    if let Some(db_path) = overrides.db_path {
        server_config.db_path = db_path;
    }
    if overrides.static_dir.is_some() {
        server_config.static_dir = overrides.static_dir;
    }
    server_config.dev_mode |= overrides.dev;

    // No browser inside dev containers.
    if overrides.open && !server_config.dev_mode {
        let url = format!("http://localhost:{}", server_config.port);
        tokio::spawn(async move {
            // Give the listener a moment to bind
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                warn!(error = %e, "Failed to open browser");
            }
        });
    }

    server::start_server(server_config).await
}

pub fn cmd_init_db(config: &AiosConfig, db_path: Option<PathBuf>) -> Result<()> {
    let db_path = db_path.unwrap_or_else(|| config.database.path.clone());
    server::open_database(&db_path)?;
    println!("Database initialized at {}", db_path.display());
    Ok(())
}
