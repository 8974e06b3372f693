pub mod config;
pub mod desktop;
pub mod errors;
pub mod logging;
