mod cli;

use sqlscope::{config, server};
use sqlscope_db::{Database, ModelRegistry};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting sqlscope server");

    let db = connect(&config)?;
    server::start_server(config, Arc::new(db)).await
}

fn connect(config: &config::Config) -> Result<Database> {
    Database::connect(config.database.clone(), Arc::new(ModelRegistry::new()))
        .context("Failed to initialize database")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "sqlscope=trace,sqlscope_db=debug,sqlscope::echo=info,tower_http=debug".to_string()
        } else {
            "sqlscope=info,sqlscope_db=info,sqlscope::echo=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Check => check(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("sqlscope {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let db = connect(&config)?;

    println!("Checking database binds...\n");

    let engines = db.engines()?;
    let failures = db.session_scope(|session| {
        let mut failures = 0;
        for engine in &engines {
            let name = engine.bind().unwrap_or("<default>");
            let result = session.with_connection(engine.bind(), |conn| {
                conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
            });

            match result {
                Ok(version) => println!("✓ {} - {} (SQLite {})", name, engine.url(), version),
                Err(e) => {
                    failures += 1;
                    println!("✗ {} - {}: {}", name, engine.url(), e);
                }
            }
        }
        Ok(failures)
    })?;

    println!();
    if failures == 0 {
        println!("All {} binds are reachable!", engines.len());
        Ok(())
    } else {
        anyhow::bail!("{} of {} binds failed", failures, engines.len())
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::load_config_or_default(None)?
        }
    };

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Default URL: {}",
        config.database.url.as_deref().unwrap_or("(none)")
    );
    println!("  Binds: {}", config.database.binds.len());
    for (name, url) in &config.database.binds {
        println!("    {} = {}", name, url);
    }
    println!("  Future mode: {}", config.database.engine.future);
    println!("  Pool size: {}", config.database.engine.pool_size);

    Ok(())
}
