//! foldersync command-line entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foldersync::client::{PeerConfigBuilder, PeerSession};
use foldersync::core::{DEFAULT_CLIENT_HOST, DEFAULT_PORT, DEFAULT_SERVER_HOST, SyncPath};
use foldersync::server::{RelayConfigBuilder, RelayServer};
use foldersync::sync::{VersionArchive, WatchMode};

#[derive(Parser, Debug)]
#[command(name = "foldersync")]
#[command(about = "Mirror a folder across machines through a relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server
    Relay(RelayArgs),
    /// Watch a folder and sync it through a relay
    Peer(PeerArgs),
    /// Inspect or restore archived versions
    #[command(subcommand)]
    Versions(VersionsCommand),
}

#[derive(Args, Debug)]
struct RelayArgs {
    /// Address to bind to
    #[arg(long, env = "FOLDERSYNC_HOST", default_value = DEFAULT_SERVER_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "FOLDERSYNC_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds between two status broadcasts
    #[arg(long, env = "FOLDERSYNC_STATUS_INTERVAL", default_value_t = 5)]
    status_interval: u64,
}

#[derive(Args, Debug)]
struct PeerArgs {
    /// Relay host to connect to
    #[arg(long, env = "FOLDERSYNC_HOST", default_value = DEFAULT_CLIENT_HOST)]
    host: String,

    /// Relay port
    #[arg(short, long, env = "FOLDERSYNC_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Folder to keep in sync
    #[arg(short, long, env = "FOLDERSYNC_FOLDER")]
    folder: PathBuf,

    /// Write received changes here instead of into the synced folder
    #[arg(long, env = "FOLDERSYNC_APPLY_DIR")]
    apply_dir: Option<PathBuf>,

    /// How to watch the folder: notify or poll
    #[arg(long, env = "FOLDERSYNC_WATCH", default_value_t = WatchMode::Notify)]
    watch: WatchMode,

    /// Milliseconds between two scans when polling
    #[arg(long, env = "FOLDERSYNC_POLL_MS", default_value_t = 1000)]
    poll_ms: u64,

    /// Seconds between two connection attempts
    #[arg(long, env = "FOLDERSYNC_RETRY_SECS", default_value_t = 5)]
    retry_secs: u64,
}

#[derive(Subcommand, Debug)]
enum VersionsCommand {
    /// List archived versions, for one file or for every file
    List {
        /// Synced folder holding the archive
        #[arg(short, long, env = "FOLDERSYNC_FOLDER")]
        folder: PathBuf,

        /// File path relative to the folder
        path: Option<String>,
    },
    /// Write the Nth archived version of a file (1 = oldest)
    Restore {
        /// Synced folder holding the archive
        #[arg(short, long, env = "FOLDERSYNC_FOLDER")]
        folder: PathBuf,

        /// File path relative to the folder
        path: String,

        /// Version number as shown by `versions list`
        ordinal: usize,

        /// Destination file (defaults to the file's place in the folder)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foldersync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Relay(args) => run_relay(args).await,
        Command::Peer(args) => run_peer(args).await,
        Command::Versions(command) => run_versions(command),
    }
}

async fn run_relay(args: RelayArgs) -> anyhow::Result<()> {
    let bind_addr = resolve(&args.host, args.port).await?;
    let config = RelayConfigBuilder::new()
        .bind_addr(bind_addr)
        .status_interval(Duration::from_secs(args.status_interval.max(1)))
        .build();

    let server = RelayServer::bind(config).await?;
    tracing::info!(
        "broadcasting peer status every {:?}",
        server.config().status_interval
    );
    shutdown_signal().await;
    server.shutdown().await;
    Ok(())
}

async fn run_peer(args: PeerArgs) -> anyhow::Result<()> {
    if !args.folder.is_dir() {
        bail!("{} is not a directory", args.folder.display());
    }
    let server_addr = resolve(&args.host, args.port).await?;

    let mut builder = PeerConfigBuilder::new()
        .server_addr(server_addr)
        .sync_root(&args.folder)
        .watch_mode(args.watch)
        .poll_interval(Duration::from_millis(args.poll_ms.max(10)))
        .retry_delay(Duration::from_secs(args.retry_secs));
    if let Some(apply_dir) = &args.apply_dir {
        builder = builder.apply_root(apply_dir);
    }

    let session = PeerSession::new(builder.build())?;
    let config = session.config();
    tracing::info!(
        "syncing {} through {} ({} watch)",
        config.sync_root.display(),
        config.server_addr,
        config.watch_mode
    );
    tokio::select! {
        _ = session.run() => {}
        _ = shutdown_signal() => {}
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

fn run_versions(command: VersionsCommand) -> anyhow::Result<()> {
    match command {
        VersionsCommand::List { folder, path } => {
            let archive = VersionArchive::open(&folder)?;
            let paths = match path {
                Some(path) => vec![SyncPath::new(&path)?],
                None => archive.paths(),
            };
            for path in paths {
                let versions = archive.list_versions(&path);
                println!("{} ({} versions)", path, versions.len());
                for (idx, version) in versions.iter().enumerate() {
                    println!("  {:>3}  {}", idx + 1, version);
                }
            }
            Ok(())
        }
        VersionsCommand::Restore {
            folder,
            path,
            ordinal,
            out,
        } => {
            let archive = VersionArchive::open(&folder)?;
            let path = SyncPath::new(&path)?;
            let Some(payload) = archive.restore_ordinal(&path, ordinal)? else {
                bail!("{} has no version {}", path, ordinal);
            };

            let out = out.unwrap_or_else(|| path.to_local(&folder));
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(&out, &payload)
                .with_context(|| format!("writing {}", out.display()))?;
            println!(
                "restored {} version {} to {} ({} bytes)",
                path,
                ordinal,
                out.display(),
                payload.len()
            );
            Ok(())
        }
    }
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("resolving {host}:{port}"))?
        .next()
        .with_context(|| format!("{host}:{port} did not resolve to any address"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
