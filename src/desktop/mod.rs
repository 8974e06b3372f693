//! AI OS desktop back-end.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │ Browser  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │ desktop  │ <─────── │    ├─ api.rs   (REST handlers, AppState)         │
//! └──────────┘ WebSocket│    ├─ ws.rs    (terminal/metrics/chat socket)    │
//!                       │    └─ auth.rs  (proxy identity extractor)        │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  filesystem.rs  (virtual per-user file tree)     │
//!                       │  ai.rs          (ChatBackend, fallbacks)         │
//!                       │  metrics.rs     (host sampler)                   │
//!                       │  window.rs      (window manager, app catalog)    │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  db.rs  (SQLite via rusqlite, DbHandle)          │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! Every record is owned by a user; handlers scope all reads and writes to
//! the caller identified by [`auth::AuthUser`].

pub mod ai;
pub mod api;
pub mod auth;
pub mod db;
pub mod filesystem;
pub mod metrics;
pub mod models;
pub mod server;
pub mod window;
pub mod ws;
