use std::{
    net::{IpAddr, Ipv4Addr},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::level_filters::LevelFilter;

const COLLECTOR_HOST: &str = "PROCMON_COLLECTOR_HOST";

const BIND_ADDR: &str = "PROCMON_BIND_ADDR";

const LOG_LEVEL: &str = "PROCMON_LOG";

const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Address the agent dials when no `--host` is given.
pub fn get_collector_host() -> IpAddr {
    let host_from_env = std::env::var(COLLECTOR_HOST);
    host_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

/// Address the collector binds to.
pub fn get_bind_addr() -> IpAddr {
    let addr_from_env = std::env::var(BIND_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

pub fn get_log_level() -> LevelFilter {
    let level_from_env = std::env::var(LOG_LEVEL);
    level_from_env.map_or(LevelFilter::INFO, |res| {
        res.parse().unwrap_or(LevelFilter::INFO)
    })
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
