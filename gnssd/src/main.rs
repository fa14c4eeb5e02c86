mod config;
mod dispatcher;
mod dop;
mod drivers;
mod fixups;
mod json_out;
mod nmea;
mod ntrip;
mod report;
mod session;
mod subscriber;
mod timehook;
mod uri;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use config::{Args, DaemonConfig};
use dispatcher::{accept_loop, Daemon, SIGNALLED};
use timehook::LogClockSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gnssd=info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = DaemonConfig::from_args(args);
    info!(
        "gnssd v{} starting — {} device(s), port {}{}{}",
        env!("CARGO_PKG_VERSION"),
        cfg.devices.len(),
        cfg.port,
        if cfg.readonly { ", read-only" } else { "" },
        if cfg.passive { ", passive" } else { "" },
    );

    let clock_sink = Arc::new(LogClockSink);
    let (mut daemon, events_rx) = Daemon::new(cfg.clone(), clock_sink);

    // Command-line devices fill the table from the front
    for path in &cfg.devices {
        if !daemon.add_device(path).await {
            warn!(device = %path, "device not added");
        }
    }

    // Subscriber listeners, IPv4 and IPv6
    let events = daemon.events_tx();
    match TcpListener::bind(("0.0.0.0", cfg.port)).await {
        Ok(listener) => {
            info!("listening on 0.0.0.0:{}", cfg.port);
            tokio::spawn(accept_loop(listener, events.clone()));
        }
        Err(err) => warn!(%err, "ipv4 listener failed"),
    }
    match TcpListener::bind(("::", cfg.port)).await {
        Ok(listener) => {
            info!("listening on [::]:{}", cfg.port);
            tokio::spawn(accept_loop(listener, events.clone()));
        }
        Err(err) => warn!(%err, "ipv6 listener failed"),
    }

    // SIGINT/SIGTERM: set the flag, let the loop wind down cleanly
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            SIGNALLED.store(true, Ordering::Relaxed);
        }
    });

    daemon.run(events_rx).await;
    info!("gnssd exiting");
    Ok(())
}
