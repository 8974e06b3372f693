use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use aios::config::AiosConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "aios")]
#[command(version, about = "AI OS desktop back-end server")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to aios.toml. Defaults to ./aios.toml, then the user config directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Port to serve on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides database.path)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Directory of the built browser client (overrides server.static_dir)
        #[arg(long)]
        static_dir: Option<PathBuf>,

        /// Enable dev mode (permissive CORS, bind on all interfaces)
        #[arg(long)]
        dev: bool,

        /// Open the desktop in a browser once the server is up
        #[arg(long)]
        open: bool,
    },
    /// Create the database and schema, then exit
    InitDb {
        /// Database path (overrides database.path)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View, validate or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default aios.toml in the current directory
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // `config init` must work even when an existing file fails to parse.
    if let Commands::Config {
        command: Some(ConfigCommands::Init),
    } = &cli.command
    {
        return cmd::cmd_config_init(cli.config.as_deref());
    }

    let config = AiosConfig::load_layered(cli.config.as_deref())?;
    let _log_guard = aios::logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            port,
            db_path,
            static_dir,
            dev,
            open,
        } => {
            cmd::cmd_serve(
                config,
                cmd::ServeOverrides {
                    port,
                    db_path,
                    static_dir,
                    dev,
                    open,
                },
            )
            .await?;
        }
        Commands::InitDb { db_path } => cmd::cmd_init_db(&config, db_path)?,
        Commands::Config { command } => cmd::cmd_config(&config, cli.config.as_deref(), command)?,
    }

    Ok(())
}
