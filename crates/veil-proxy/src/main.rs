//! Veil proxy CLI
//!
//! Usage:
//!   veil-proxy [--config veil.yaml] [serve|check]

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use veil_proxy::config::{Config, ConfigStore};
use veil_proxy::proxy::ProxyServer;

/// Forwarding proxy that obfuscates API payloads and rotates outbound proxies
#[derive(Parser, Debug)]
#[command(name = "veil-proxy")]
#[command(author, version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "VEIL_CONFIG", default_value = "veil.yaml")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the proxy (default)
    Serve,
    /// Load the configuration, rules and pool, print a summary and exit
    Check,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format);

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Check => check(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(
        listen = %config.listen.socket_addr(),
        upstream = %config.upstream.base_url(),
        "veil-proxy starting"
    );

    let store = Arc::new(ConfigStore::from_config(&config));
    let server = ProxyServer::new(&config, Arc::clone(&store))?;

    spawn_reload_on_sighup(store);

    server.run_until(shutdown_signal()).await
}

fn check(config: &Config) -> anyhow::Result<()> {
    let store = ConfigStore::from_config(config);
    let dictionaries = store.transforms().snapshot();
    let pool = store.pool();

    println!("Upstream:   {}", config.upstream.base_url());
    println!("Listen:     {}", config.listen.socket_addr());
    println!(
        "Dictionary: {} forward, {} reverse",
        dictionaries.forward.len(),
        dictionaries.reverse.len()
    );
    println!("Proxies:    {}", pool.len());
    for (index, entry) in pool.iter().enumerate() {
        let status = if entry.has_url() { "" } else { " (no url, skipped)" };
        println!("  #{index} {}{status}", entry.display_name());
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("received SIGINT (ctrl-c)");
}

#[cfg(unix)]
fn spawn_reload_on_sighup(store: Arc<ConfigStore>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Failed to register SIGHUP handler, reload via admin route only: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("received SIGHUP, reloading rules and proxy pool");
            if let Err(e) = Arc::clone(&store).reload_blocking().await {
                warn!("Reload after SIGHUP failed: {}", e);
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_store: Arc<ConfigStore>) {}
