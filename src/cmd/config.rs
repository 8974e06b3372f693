//! Configuration view and validation commands: `aios config`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use aios::config::{AiosConfig, CONFIG_FILE_NAME};

use super::super::ConfigCommands;

pub fn cmd_config(
    config: &AiosConfig,
    explicit: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let located = AiosConfig::locate(explicit);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("AI OS Configuration");
            println!("===================");
            println!();
            match &located {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("No {} found; using defaults", CONFIG_FILE_NAME),
            }
            println!();

            println!("[server]");
            println!("  host = \"{}\"", config.server.host);
            println!("  port = {}", config.server.port);
            println!("  dev_mode = {}", config.server.dev_mode);
            if let Some(dir) = &config.server.static_dir {
                println!("  static_dir = \"{}\"", dir.display());
            }
            println!();

            println!("[database]");
            println!("  path = \"{}\"", config.database.path.display());
            println!();

            println!("[ai]");
            println!("  base_url = \"{}\"", config.ai.base_url);
            println!("  model = \"{}\"", config.ai.model);
            println!("  timeout_secs = {}", config.ai.timeout_secs);
            // Never echo the key itself
            println!(
                "  api_key = {}",
                if config.ai_enabled() { "<set>" } else { "<unset>" }
            );
            println!();

            println!("[auth]");
            println!("  user_id_header = \"{}\"", config.auth.user_id_header);
            println!();

            println!("[logging]");
            println!("  level = \"{}\"", config.logging.level);
            println!("  format = \"{}\"", config.logging.format);
            if let Some(dir) = &config.logging.directory {
                println!("  directory = \"{}\"", dir.display());
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => cmd_config_init(explicit)?,
    }

    Ok(())
}

/// Write a default config file unless one already exists.
pub fn cmd_config_init(explicit: Option<&Path>) -> Result<()> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    if config_path.exists() {
        println!("{} already exists at {}", CONFIG_FILE_NAME, config_path.display());
        println!("Delete it first if you want to recreate it.");
        return Ok(());
    }

    AiosConfig::default().save(&config_path)?;

    println!("Created {} at {}", CONFIG_FILE_NAME, config_path.display());
    println!();
    println!("You can now customize:");
    println!("  - [server] host, port, static_dir");
    println!("  - [ai] base_url, model (set OPENAI_API_KEY for the key)");
    println!("  - [auth] identity header names");
    println!();
    Ok(())
}
