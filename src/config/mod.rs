mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Environment variable that overrides `database.url`.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./sqlscope.toml",
        "./config.toml",
        "~/.config/sqlscope/config.toml",
        "/etc/sqlscope/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    let mut config = Config::default();
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
        if !url.is_empty() {
            tracing::debug!("Using database URL from {}", DATABASE_URL_ENV);
            config.database.url = Some(url);
        }
    }
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let database = &config.database;
    if let Some(url) = &database.url {
        sqlscope_db::DatabaseUrl::parse(url).context("Invalid database.url")?;
    }
    for (name, url) in &database.binds {
        if name.is_empty() {
            anyhow::bail!("Bind names cannot be empty");
        }
        sqlscope_db::DatabaseUrl::parse(url)
            .with_context(|| format!("Invalid URL for bind '{}'", name))?;
    }

    if database.engine.pool_size == 0 {
        anyhow::bail!("database.engine.pool_size cannot be 0");
    }

    if database.url.is_none() && database.binds.is_empty() {
        tracing::warn!("No database URL or binds configured");
    }

    Ok(())
}
