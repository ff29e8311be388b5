//! Application Service Worker
//!
//! Replicates from a homeserver primary and drives application service
//! notifications.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use appservice_worker::config::WorkerConfig;
use appservice_worker::error::{Error, Result};
use appservice_worker::replication::ReplicationConfig;
use appservice_worker::store::ReplicaStore;
use appservice_worker::Worker;

/// Application service worker
#[derive(Parser)]
#[command(name = "appservice-worker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "appservice-worker.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker
    Start,

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "appservice-worker.toml")]
        output: PathBuf,

        /// Worker name
        #[arg(long, default_value = "appservice1")]
        name: String,

        /// Replication endpoint on the primary
        #[arg(long, default_value = "http://127.0.0.1:9092/_synapse/replication")]
        replication_url: String,
    },

    /// Show worker information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start(cli.config, cli.log_level).await,
        Commands::Validate => {
            let _guard = init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty", None)?;
            run_validate(cli.config)
        }
        Commands::Init {
            output,
            name,
            replication_url,
        } => run_init(output, name, replication_url),
        Commands::Info => run_info(cli.config).await,
    }
}

/// Install the global subscriber. The returned guard flushes the log file
/// and must outlive the worker.
fn init_logging(level: &str, format: &str, file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    let json = format == "json";

    match file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            if json {
                registry.with(layer.json()).init();
            } else {
                registry.with(layer).init();
            }
            Ok(Some(guard))
        }
        None => {
            if json {
                registry.with(tracing_subscriber::fmt::layer().json()).init();
            } else {
                registry.with(tracing_subscriber::fmt::layer()).init();
            }
            Ok(None)
        }
    }
}

/// Non-blocking writer appending to `path`; lines are written on a
/// dedicated thread, off the runtime's workers
fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::Config(format!("invalid log file path {}", path.display())))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| Error::Config(format!("cannot open log file {}: {}", path.display(), e)))?;

    Ok(tracing_appender::non_blocking(appender))
}

async fn run_start(config_path: PathBuf, log_level: Option<String>) -> Result<()> {
    // Config errors are reported before logging is set up
    let config = match WorkerConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(e);
        }
    };

    let level = log_level.unwrap_or_else(|| config.logging.level.clone());
    let _guard = init_logging(&level, &config.logging.format, config.logging.file.as_deref())?;

    tracing::info!(
        "Starting application service worker {} against {}",
        config.worker.name,
        config.worker.replication_url
    );

    let worker = Worker::new(config)?;
    worker.run_until_shutdown().await?;

    tracing::info!("Worker stopped");
    Ok(())
}

fn run_init(output: PathBuf, name: String, replication_url: String) -> Result<()> {
    let content = WorkerConfig::sample(&name, &replication_url);

    std::fs::write(&output, content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nSet appservice.handler_url to deliver notifications.");
    println!(
        "Then start with: appservice-worker --config {} start",
        output.display()
    );

    Ok(())
}

fn run_validate(config_path: PathBuf) -> Result<()> {
    match WorkerConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Worker:          {}", config.worker.name);
            println!("  Replication URL: {}", config.worker.replication_url);
            println!("  Data Directory:  {}", config.data_dir().display());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

async fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WorkerConfig::from_file(&config_path)?;
    let replication = ReplicationConfig::default();

    println!("Application Service Worker Information");
    println!("======================================");
    println!();
    println!("Worker:           {}", config.worker.name);
    println!("Replication URL:  {}", config.worker.replication_url);
    println!("Data Directory:   {}", config.data_dir().display());
    println!("Replica DB:       {}", config.replica_db_path().display());
    println!();
    println!("Replication:");
    println!("  Long poll:      {} ms", replication.long_poll_timeout.as_millis());
    println!("  Backoff:        {} s", replication.backoff.as_secs());
    println!("  Hard timeout:   {} s", replication.hard_timeout().as_secs());
    println!();
    println!("HTTP Listener:");
    println!("  Enabled:        {}", config.api.enabled);
    println!("  Bind Address:   {}", config.api.bind_address);
    println!();
    println!(
        "Handler:          {}",
        config
            .appservice
            .handler_url
            .as_deref()
            .unwrap_or("(none, notifications are logged)")
    );

    if config.replica_db_path().exists() {
        let store = ReplicaStore::open(&config.replica_db_path())?;
        println!();
        println!("Stream Positions:");
        for (stream, position) in store.stream_positions().await? {
            println!("  {:<14}  {}", format!("{}:", stream), position);
        }
        println!("  Events stored:  {}", store.event_count().await?);
    }

    Ok(())
}
