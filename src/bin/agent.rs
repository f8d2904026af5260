use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::{Parser, error::ErrorKind};
use process_monitor::{
    agent::{Agent, AgentOptions},
    monitors::SysinfoMetrics,
    storage::{ConfigStore, FileConfigStore},
    tracer::SysinfoTracer,
    transport::TcpConnector,
    util::{get_collector_host, get_log_level},
};
use tracing::{error, info, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Watches local processes and reports threshold violations")]
struct Args {
    /// Collector port
    port: u16,

    /// Collector address
    #[arg(long)]
    host: Option<IpAddr>,

    /// Period of the CPU and memory sweep
    #[arg(long, default_value_t = 1000)]
    sample_interval_ms: u64,

    /// Where the last received configuration is cached
    #[arg(long)]
    config_cache: Option<PathBuf>,
}

fn init() {
    let level = get_log_level();
    let filter = filter::Targets::new().with_targets(vec![
        ("process_monitor", level),
        ("procmon_agent", level),
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

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = parse_args();
    trace!("started with args: {args:?}");

    let host = args.host.unwrap_or_else(get_collector_host);
    let addr = SocketAddr::new(host, args.port);

    let store: Arc<dyn ConfigStore> = match &args.config_cache {
        Some(path) => Arc::new(FileConfigStore::new(path)),
        None => Arc::new(FileConfigStore::default_location()),
    };

    let options = AgentOptions {
        sample_interval: Duration::from_millis(args.sample_interval_ms.max(1)),
        ..AgentOptions::default()
    };

    let agent = Agent::start(
        TcpConnector::new(addr),
        Arc::new(SysinfoTracer::new()),
        Arc::new(SysinfoMetrics::new()),
        store,
        options,
    )
    .with_context(|| format!("failed to start agent for collector {addr}"))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down");
    agent.shutdown();
    Ok(())
}
