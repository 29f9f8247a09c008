mod factory;
mod server;

use std::time::Duration;

use clap::Parser;
use engine::logic::conversation;
use engine::logic::event::DEFAULT_EVENT_BUS_CAPACITY;
use engine::logic::integration::DEFAULT_REOPEN_WINDOW_SECS;
use engine::service::EngineService;
use tracing::{error, info};
use url::Url;

use crate::factory::{create_engine_service, CreateEngineServiceParams};
use crate::server::{start_axum_server, StartAxumServerParams};

/// Omnichannel conversation engine API server
#[derive(Parser)]
#[command(name = "engine-server", version)]
struct Cli {
    /// Interface to bind
    #[arg(long, env = "ENGINE_HOST", default_value = "127.0.0.1")]
    host: String,
    /// Port to listen on
    #[arg(long, env = "ENGINE_PORT", default_value_t = 3000)]
    port: u16,
    /// Database connection string. `libsql://./engine.db` opens a local
    /// file; `libsql://host?mode=remote&auth=TOKEN` connects to a remote
    /// database.
    #[arg(long, env = "ENGINE_DB_URL", default_value = "libsql://./engine.db")]
    db_url: Url,
    /// Seconds between sweeps that close resolved conversations whose reopen
    /// window has lapsed
    #[arg(long, env = "ENGINE_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    sweep_interval_secs: u64,
    /// Reopen window applied by the close sweep
    #[arg(long, env = "ENGINE_REOPEN_WINDOW_SECS", default_value_t = DEFAULT_REOPEN_WINDOW_SECS)]
    reopen_window_secs: u64,
    /// Broadcast capacity of the in-process event bus
    #[arg(long, env = "ENGINE_EVENT_BUS_CAPACITY", default_value_t = DEFAULT_EVENT_BUS_CAPACITY)]
    event_bus_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shared::logging::configure_logging()?;

    let cli = Cli::parse();

    let (_db, service) = create_engine_service(CreateEngineServiceParams {
        db_url: cli.db_url,
        event_bus_capacity: cli.event_bus_capacity,
    })
    .await?;

    let sweeper = tokio::spawn(run_close_sweep(
        service.clone(),
        Duration::from_secs(cli.sweep_interval_secs),
        Duration::from_secs(cli.reopen_window_secs),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    let (server_fut, _handle, addr) = start_axum_server(StartAxumServerParams {
        host: cli.host,
        port: cli.port,
        system_shutdown_signal_rx: shutdown_rx,
        service,
    })
    .await?;
    info!("Listening on {}", addr);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received ctrl-c, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    server_fut.await?;
    sweeper.abort();

    Ok(())
}

/// Periodically close resolved conversations that have sat past the reopen
/// window without a new inbound message.
async fn run_close_sweep(service: EngineService, interval: Duration, reopen_window: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match conversation::close_expired(&service.repository, &service.event_bus, reopen_window)
            .await
        {
            Ok(0) => {}
            Ok(closed) => info!(closed, "Closed conversations past their reopen window"),
            Err(e) => error!("Close sweep failed: {e:?}"),
        }
    }
}
