use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::ai::AiService;
use super::api::{self, AppState, SharedState};
use super::db::{DbHandle, DesktopDb};
use super::ws;
use crate::config::{AiSection, AiosConfig, AuthSection};

/// Configuration for the desktop server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub static_dir: Option<PathBuf>,
    pub ai: AiSection,
    pub auth: AuthSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&AiosConfig::default())
    }
}

impl From<&AiosConfig> for ServerConfig {
    fn from(config: &AiosConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.database.path.clone(),
            dev_mode: config.server.dev_mode,
            static_dir: config.server.static_dir.clone(),
            ai: config.ai.clone(),
            auth: config.auth.clone(),
        }
    }
}

impl ServerConfig {
    /// Dev mode listens on every interface so a containerised client can reach it.
    pub fn bind_host(&self) -> &str {
        if self.dev_mode { "0.0.0.0" } else { &self.host }
    }
}

/// Build the full application router: REST API, WebSocket and, when a client
/// build directory is given, the static client with an `index.html` fallback
/// for client-side routing.
pub fn build_router(state: SharedState, static_dir: Option<&Path>, dev_mode: bool) -> Router {
    let mut app = api::api_router().route("/ws", get(ws::ws_handler));

    if let Some(dir) = static_dir {
        let index = dir.join("index.html");
        app = app.fallback_service(ServeDir::new(dir).not_found_service(ServeFile::new(index)));
    }

    let mut app = app.with_state(state).layer(TraceLayer::new_for_http());
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the database, creating its parent directory if needed.
pub fn open_database(path: &Path) -> Result<DesktopDb> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    DesktopDb::new(path).context("Failed to initialize desktop database")
}

/// Start the desktop server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = open_database(&config.db_path)?;
    let ai = AiService::from_config(&config.ai).context("Failed to configure AI backend")?;
    info!(model = ai.model_id(), "AI backend ready");

    let state = Arc::new(AppState::new(DbHandle::new(db), ai, config.auth.clone()));

    if let Some(dir) = config.static_dir.as_deref().filter(|d| !d.exists()) {
        warn!(dir = %dir.display(), "Static client directory does not exist");
    }
    let app = build_router(state, config.static_dir.as_deref(), config.dev_mode);

    let addr = format!("{}:{}", config.bind_host(), config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, db = %config.db_path.display(), "AI OS server listening");
    println!("AI OS running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
