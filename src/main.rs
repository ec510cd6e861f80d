use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info};

use eventdb::{
    config::{Configuration, SharedConfig},
    logging, observability, server,
    store::EventStore,
    vacuum,
};

#[derive(Parser)]
#[command(
    name = "eventdb",
    version,
    about = "Embedded event database with a dashboard-oriented HTTP API"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long = "config.file", default_value = "eventdb.yml")]
    config_file: PathBuf,

    /// Address to listen on for the web interface and telemetry.
    #[arg(long = "web.listen-address", default_value = ":9701")]
    listen_address: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Configuration::load(&cli.config_file)
        .with_context(|| format!("error parsing config file {}", cli.config_file.display()))?;
    logging::init(config.debug);
    observability::init()?;

    let addr = parse_listen_address(&cli.listen_address)?;
    let shared = SharedConfig::new(config.clone());
    let store = Arc::new(
        EventStore::open(&config.dbfile)
            .with_context(|| format!("error opening database {}", config.dbfile))?,
    );

    let vacuum_shutdown = Arc::new(Notify::new());
    tokio::spawn(vacuum::run(
        Arc::clone(&store),
        shared.clone(),
        Arc::clone(&vacuum_shutdown),
    ));

    spawn_reload_task(cli.config_file.clone(), shared.clone());

    info!("starting eventdb");
    server::run(addr, Arc::clone(&store), shared, server::shutdown_signal()).await?;

    info!("closing");
    vacuum_shutdown.notify_waiters();
    store.close()?;
    Ok(())
}

fn parse_listen_address(raw: &str) -> Result<SocketAddr> {
    // A bare ":port" binds every interface.
    let addr = if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        raw.to_owned()
    };
    addr.parse()
        .with_context(|| format!("invalid listen address {raw}"))
}

/// SIGHUP reloads the configuration file and swaps it in atomically; a failed
/// reload keeps the running configuration.
fn spawn_reload_task(path: PathBuf, shared: SharedConfig) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hup = match signal(SignalKind::hangup()) {
            Ok(hup) => hup,
            Err(err) => {
                error!("failed to install SIGHUP handler: {err}");
                return;
            }
        };

        while hup.recv().await.is_some() {
            match Configuration::load(&path) {
                Ok(config) => {
                    shared.store(config);
                    info!("configuration reloaded");
                }
                Err(err) => {
                    error!("reloading configuration error: {err}; configuration not changed");
                }
            }
        }
    });

    #[cfg(not(unix))]
    {
        let _ = (path, shared);
    }
}
