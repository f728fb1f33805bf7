use anyhow::{Context, Result};
use clap::Parser;
use common::AccessMode;
use common::transport::init_crypto;
use dfs_client::{ClientCache, CommandEditor, RemoteServer, serve_callbacks};
use gethostname::gethostname;
use log::error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "dfs-client", version, about = "Distributed file cache client")]
struct Cli {
    /// ip:port of the file server
    #[arg(short, long)]
    server: SocketAddr,

    /// Name announced to the server, defaults to the host name
    #[arg(short, long)]
    identity: Option<String>,

    /// Local file holding the cached copy, defaults to /tmp/<user>.txt
    #[arg(short, long)]
    cache_path: Option<PathBuf>,

    /// Editor program, defaults to $EDITOR or emacs
    #[arg(short, long)]
    editor: Option<String>,
}

fn default_cache_path() -> PathBuf {
    let user = std::env::var("USER").unwrap_or_else(|_| "dfs".to_string());
    PathBuf::from(format!("/tmp/{user}.txt"))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    init_crypto();

    let identity = cli
        .identity
        .unwrap_or_else(|| gethostname().to_string_lossy().into_owned());
    let cache_path = cli.cache_path.unwrap_or_else(default_cache_path);
    let editor = match cli.editor {
        Some(program) => CommandEditor::new(program),
        None => CommandEditor::from_env(),
    };

    let remote = RemoteServer::connect(cli.server, &identity)
        .await
        .with_context(|| format!("failed to connect to {}", cli.server))?;
    let conn = remote.connection();
    let cache = ClientCache::new(identity, Arc::new(remote), cache_path);
    tokio::spawn(serve_callbacks(conn, Arc::new(cache.clone())));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout
            .write_all(b"Next file to open? <filename> <r|w>, or exit: ")
            .await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => continue,
            ["exit"] | ["quit"] => break,
            [filename, mode] => {
                let mode = match mode.parse::<AccessMode>() {
                    Ok(m) => m,
                    Err(e) => {
                        eprintln!("{e}");
                        continue;
                    }
                };
                if let Err(e) = cache.session(filename, mode, &editor).await {
                    error!("session on {filename} failed: {e}");
                    eprintln!("could not open {filename}: {e}");
                }
            }
            _ => eprintln!("usage: <filename> <r|w>"),
        }
    }

    println!("Writing any changes ...");
    cache.shutdown().await?;
    println!("DONE");
    Ok(())
}
