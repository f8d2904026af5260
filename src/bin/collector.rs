use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, error::ErrorKind};
use process_monitor::{
    config::read_config_file,
    transport::{ConfigWatcher, TransportServer},
    util::{get_bind_addr, get_log_level},
};
use tokio::{
    select, spawn,
    sync::{mpsc, watch},
};
use tracing::{info, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Distributes thresholds to agents and prints their violations")]
struct Args {
    /// Port to listen on
    port: u16,

    /// Configuration file sent to every agent
    #[arg(long, default_value = "monitor.json")]
    config: PathBuf,

    /// How often the configuration file is checked for changes
    #[arg(long, default_value_t = 2)]
    reload_interval_secs: u64,
}

fn init() {
    let level = get_log_level();
    let filter = filter::Targets::new().with_targets(vec![
        ("process_monitor", level),
        ("procmon_collector", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = parse_args();
    trace!("started with args: {args:?}");

    let entries = read_config_file(&args.config)?;
    info!("loaded {} entries from {}", entries.len(), args.config.display());
    let (config_tx, config_rx) = watch::channel(Arc::new(entries));

    let addr = SocketAddr::new(get_bind_addr(), args.port);
    let server = TransportServer::bind(addr, config_rx)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let watcher = ConfigWatcher::new(&args.config, config_tx);
    spawn(watcher.run(Duration::from_secs(args.reload_interval_secs.max(1))));

    let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
    spawn(server.run(reports_tx));

    loop {
        select! {
            Some(report) = reports_rx.recv() => println!("{report}"),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("shutting down");
    Ok(())
}
