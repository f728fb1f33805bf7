mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use common::transport::{init_crypto, make_server_endpoint};
use dfs_server::config::load_config;
use dfs_server::{CoherenceServer, ConnectionRegistry, LocalFsStore, serve};
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Start { config } => {
            let cfg = load_config(&config.to_string_lossy())?;
            let addr: SocketAddr = cfg
                .addr
                .parse()
                .with_context(|| format!("invalid listen address {}", cfg.addr))?;
            init_crypto();

            let registry = ConnectionRegistry::new();
            let store = Arc::new(LocalFsStore::new(&cfg.root));
            let server = Arc::new(CoherenceServer::new(
                store,
                Arc::new(registry.clone()),
                cfg.policy(),
            ));
            let endpoint = make_server_endpoint(addr).await?;
            info!(
                "[dfs-server] listening on {} serving {}",
                endpoint.local_addr()?,
                cfg.root.display()
            );
            serve(endpoint, server, registry).await?;
        }
    }

    Ok(())
}
