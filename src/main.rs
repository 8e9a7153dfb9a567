//! MirrorSync - Primary/Replica File Mirroring
//!
//! CLI entry point: serves node identities from a config file and offers
//! one-shot client operations (failover download, sync triggers, store
//! management).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mirrorsync::client::ControlClient;
use mirrorsync::config::MirrorConfig;
use mirrorsync::download::FailoverDownloader;
use mirrorsync::error::{Error, Result};
use mirrorsync::events::{Event, EventBus, StatusKind};
use mirrorsync::node::NodeSupervisor;
use mirrorsync::store::LocalStore;
use mirrorsync::sync::PushSync;
use mirrorsync::transfer::TransferClient;

/// MirrorSync - Primary/Replica File Mirroring
#[derive(Parser)]
#[command(name = "mirrorsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "mirrorsync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node identities defined in the configuration
    Serve,

    /// Download a file with failover across the primary and its replicas
    Download {
        /// Primary address (host:port)
        #[arg(short, long)]
        primary: String,

        /// File to download
        filename: String,

        /// Destination directory (defaults to the configured downloads dir)
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },

    /// Run a pull-sync pass for one configured replica
    PullSync {
        /// Replica id from the configuration
        #[arg(long)]
        replica_id: u32,
    },

    /// Push the primary's files to one replica (legacy name-only diff)
    PushSync {
        /// Replica address (host:port)
        #[arg(short, long)]
        replica: String,
    },

    /// Copy a local file into the primary's store
    AddFile {
        /// Source file path
        path: PathBuf,
    },

    /// List the files served by a node
    List {
        /// Node address (host:port)
        #[arg(short, long)]
        address: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "mirrorsync.toml")]
        output: PathBuf,
    },

    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Serve => run_serve(cli.config).await,
        Commands::Download { primary, filename, dest } => {
            run_download(cli.config, primary, filename, dest).await
        }
        Commands::PullSync { replica_id } => run_pull_sync(cli.config, replica_id).await,
        Commands::PushSync { replica } => run_push_sync(cli.config, replica).await,
        Commands::AddFile { path } => run_add_file(cli.config, path).await,
        Commands::List { address } => run_list(address).await,
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Forward bus events to the log
fn spawn_event_logger(events: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Event::Status { role, replica_id, kind, message }) => {
                    let label = match replica_id {
                        Some(id) => format!("{} {}", role, id),
                        None => role.to_string(),
                    };
                    match kind {
                        StatusKind::Error => tracing::error!("[{}] {}", label, message),
                        StatusKind::Warning => tracing::warn!("[{}] {}", label, message),
                        _ => tracing::info!("[{}] {}", label, message),
                    }
                }
                Ok(Event::TransferProgress { filename, percent, bytes_per_sec }) => {
                    tracing::info!("{}: {}% ({} B/s)", filename, percent, bytes_per_sec);
                }
                Ok(Event::FileListChanged { role, replica_id }) => {
                    tracing::debug!("File list changed on {} {:?}", role, replica_id);
                }
                Ok(Event::SyncPlanReady { replica_id, downloads, deletes }) => {
                    tracing::info!(
                        "Replica {}: will download {:?}, delete {:?}",
                        replica_id,
                        downloads,
                        deletes
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Start every configured node identity and run until Ctrl-C
async fn run_serve(config_path: PathBuf) -> Result<()> {
    let config = MirrorConfig::from_file(&config_path)?;
    let events = EventBus::new();
    let _logger = spawn_event_logger(&events);

    let supervisor = NodeSupervisor::new(&config.transfer, events.clone())?;

    if let Some(primary) = &config.primary {
        let addr = supervisor.start_primary(primary).await?;
        tracing::info!("Primary serving {} on {}", primary.storage_root.display(), addr);
    }
    for replica in &config.replicas {
        let addr = supervisor.start_replica(replica).await?;
        tracing::info!(
            "Replica {} serving {} on {}",
            replica.id,
            replica.storage_root.display(),
            addr
        );
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Internal(format!("failed to listen for shutdown signal: {}", e)))?;
    tracing::info!("Shutting down...");
    supervisor.stop_all().await;

    Ok(())
}

fn transfer_client(config: &MirrorConfig, events: EventBus) -> Result<TransferClient> {
    TransferClient::new(
        config.connect_timeout(),
        config.idle_timeout(),
        config.progress_interval(),
        events,
    )
}

/// Failover download into the downloads directory
async fn run_download(
    config_path: PathBuf,
    primary: String,
    filename: String,
    dest: Option<PathBuf>,
) -> Result<()> {
    // Missing config is fine for client commands; defaults apply.
    let config = load_or_default(&config_path)?;
    let events = EventBus::new();
    let logger = spawn_event_logger(&events);

    let downloader = FailoverDownloader::new(
        ControlClient::new(config.connect_timeout())?,
        transfer_client(&config, events.clone())?,
        events.clone(),
    );

    let dest_dir = dest.unwrap_or_else(|| config.client.downloads_dir.clone());
    let result = downloader.download(&primary, &filename, &dest_dir).await;

    // Drop every bus sender so the logger drains and exits
    drop(downloader);
    drop(events);
    let _ = logger.await;

    let report = result?;
    println!(
        "Downloaded {} from {} -> {}",
        report.filename,
        report.endpoint,
        report.dest.display()
    );
    Ok(())
}

/// One pull-sync pass for a configured replica, without serving
async fn run_pull_sync(config_path: PathBuf, replica_id: u32) -> Result<()> {
    let config = MirrorConfig::from_file(&config_path)?;
    let replica = config.replica(replica_id).ok_or_else(|| {
        Error::Config(format!("replica {} is not defined in the configuration", replica_id))
    })?;

    let events = EventBus::new();
    let logger = spawn_event_logger(&events);

    let store = LocalStore::open(&replica.storage_root).await?;
    let engine = mirrorsync::sync::PullSync::new(
        replica_id,
        store,
        replica.primary_address.clone(),
        ControlClient::new(config.connect_timeout())?,
        transfer_client(&config, events.clone())?,
        events.clone(),
    );
    let result = engine.run().await;

    drop(engine);
    drop(events);
    let _ = logger.await;

    let report = result?;
    if report.is_success() {
        println!(
            "Replica {} converged: {} downloads, {} deletes",
            replica_id,
            report.results.len(),
            report.deleted.len()
        );
        Ok(())
    } else {
        Err(Error::Internal("sync aborted; see log for the failing file".into()))
    }
}

/// Legacy push from the primary's store to one replica
async fn run_push_sync(config_path: PathBuf, replica: String) -> Result<()> {
    let config = MirrorConfig::from_file(&config_path)?;
    let primary = config
        .primary
        .as_ref()
        .ok_or_else(|| Error::Config("no primary defined in the configuration".into()))?;

    let events = EventBus::new();
    let logger = spawn_event_logger(&events);

    let store = LocalStore::open(&primary.storage_root).await?;
    let engine = PushSync::new(
        store,
        ControlClient::new(config.connect_timeout())?,
        transfer_client(&config, events.clone())?,
        events.clone(),
    );
    let result = engine.run(&replica).await;

    drop(engine);
    drop(events);
    let _ = logger.await;

    let report = result?;
    println!(
        "Push sync done: {} uploaded, {} fetched back",
        report.uploaded.len(),
        report.fetched.len()
    );
    Ok(())
}

/// Copy a file into the primary's store
async fn run_add_file(config_path: PathBuf, path: PathBuf) -> Result<()> {
    let config = MirrorConfig::from_file(&config_path)?;
    let primary = config
        .primary
        .as_ref()
        .ok_or_else(|| Error::Config("no primary defined in the configuration".into()))?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidName(path.display().to_string()))?
        .to_string();

    let store = LocalStore::open(&primary.storage_root).await?;
    let dest = store.path_for(&name)?;
    tokio::fs::copy(&path, &dest).await?;

    println!("Added {} to {}", name, primary.storage_root.display());
    Ok(())
}

/// Print a node's file list
async fn run_list(address: String) -> Result<()> {
    let client = ControlClient::new(Duration::from_secs(5))?;
    let names = client.list_files(&address).await?;
    if names.is_empty() {
        println!("(no files)");
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

/// Write a default configuration file
fn run_init(output: PathBuf) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!(
            "{} already exists; remove it first",
            output.display()
        )));
    }

    let config = MirrorConfig::default();
    let content = toml::to_string_pretty(&config)
        .map_err(|e| Error::Internal(format!("failed to serialize config: {}", e)))?;
    std::fs::write(&output, content)?;

    println!("Wrote {}", output.display());
    Ok(())
}

/// Parse and validate the configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    let config = MirrorConfig::from_file(&config_path)?;
    println!(
        "Configuration OK: primary={}, {} replica(s)",
        config.primary.is_some(),
        config.replicas.len()
    );
    Ok(())
}

/// Use the config file when present, defaults otherwise
fn load_or_default(config_path: &PathBuf) -> Result<MirrorConfig> {
    if config_path.exists() {
        MirrorConfig::from_file(config_path)
    } else {
        Ok(MirrorConfig::default())
    }
}
