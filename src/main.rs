//! streamnode binary: load configuration and input lists, launch the
//! session pool, then run until interrupted (or until every session has
//! stopped, which only happens when all of them fail authentication).

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use streamnode::accounts;
use streamnode::config::Config;
use streamnode::pool::SessionPool;
use streamnode::proxy;

/// Multi-account session keeper and task-relay client for stream gateways.
#[derive(Parser)]
#[command(name = "streamnode", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
    /// Route all traffic through the proxy list.
    #[arg(long)]
    proxy: bool,
    /// Override the account list path.
    #[arg(long)]
    accounts: Option<String>,
    /// Override the proxy list path.
    #[arg(long)]
    proxies: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("streamnode: configuration error: {e}");
            std::process::exit(1);
        }
    };
    if cli.proxy {
        config.proxy.enabled = true;
    }
    if let Some(path) = cli.accounts {
        config.accounts.file = path;
    }
    if let Some(path) = cli.proxies {
        config.proxy.file = path;
    }

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("streamnode v{} starting", env!("CARGO_PKG_VERSION"));
    info!("gateway: {}", config.service.gateway_url);

    let credentials = match accounts::load_credentials(&config.accounts.file, config.auth.mode) {
        Ok(credentials) => credentials,
        Err(e) => {
            eprintln!("streamnode: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "loaded {} account(s) from {}",
        credentials.len(),
        config.accounts.file
    );

    let proxies = if config.proxy.enabled {
        match proxy::load_proxies(&config.proxy.file) {
            Ok(proxies) => {
                info!(
                    "loaded {} proxy endpoint(s) from {}",
                    proxies.len(),
                    config.proxy.file
                );
                proxies
            }
            Err(e) => {
                eprintln!("streamnode: {e}");
                std::process::exit(1);
            }
        }
    } else {
        Vec::new()
    };

    let pool = match SessionPool::spawn(Arc::new(config), credentials, proxies) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("streamnode: {e}");
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received interrupt, shutting down"),
        () = pool.join() => warn!("all sessions have stopped"),
    }
}
