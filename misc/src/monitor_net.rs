//! Watches network availability through `NetworkService` and logs every
//! transition, with the length of each outage once the network is back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use lib_netaccess::loggers::setup_logging;
use lib_netaccess::{load_config, Event, EventBus, EventKind, NetworkService, Subscriber};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[clap(about = "Monitors network availability and logs outages", version)]
struct Args {
    #[clap(long, env = "NETACCESS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    config: Option<PathBuf>,

    #[clap(long, env = "NETACCESS_INTERVAL_SECS", default_value_t = 10, help = "Seconds between checks.")]
    interval: u64,

    #[clap(long, env = "NETACCESS_LOG_DIR", default_value = "logs", help = "Directory for log files.")]
    log_dir: PathBuf,

    #[clap(long, env = "NETACCESS_LOG_LEVEL", default_value = "info", help = "Logging level (trace, debug, info, warn, error).")]
    log_level: String,

    #[clap(long, env = "NETACCESS_DISPATCH", help = "Event dispatch mode (sync or async).")]
    dispatch: Option<String>,

    #[clap(long, env = "NETACCESS_OFFLINE_AFTER", help = "Consecutive failures before the network counts as down.")]
    offline_after: Option<i32>,

    #[clap(long, env = "NETACCESS_CHECK_URLS", help = "Comma separated URLs to probe.")]
    check_urls: Option<String>,
}

impl Args {
    /// CLI/env values as configuration overrides.
    fn overrides(&self) -> BTreeMap<String, String> {
        let mut options = BTreeMap::new();
        if let Some(dispatch) = &self.dispatch {
            options.insert("events.dispatch".to_string(), dispatch.clone());
        }
        if let Some(k) = self.offline_after {
            options.insert("network.failuresBeforeOffline".to_string(), k.to_string());
        }
        if let Some(urls) = &self.check_urls {
            options.insert("network.connCheckUrls".to_string(), urls.clone());
        }
        options
    }
}

/// Logs status transitions and measures outages.
#[derive(Default)]
struct StatusLogger {
    down_since: Mutex<Option<Instant>>,
}

#[async_trait]
impl Subscriber for StatusLogger {
    async fn handle_event(&self, event: &Event) -> Result<()> {
        match event.kind() {
            EventKind::NetworkStatusChange => {
                let online = event.payload().as_flag().unwrap_or(false);
                let mut down_since = self.down_since.lock().unwrap_or_else(|e| e.into_inner());
                if online {
                    match down_since.take() {
                        Some(start) => info!(down_for = ?start.elapsed(), "Connection restored"),
                        None => info!("Network online"),
                    }
                } else if down_since.is_none() {
                    warn!("Disconnected!");
                    *down_since = Some(Instant::now());
                }
            }
            EventKind::NetworkCommunicationStatus => {
                if event.payload().as_flag() == Some(false) {
                    debug!("Request failed");
                }
            }
            EventKind::StatusMessage => {
                if let Some(text) = event.payload().as_text() {
                    info!(message = text, "Status");
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "status-logger"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _guard = setup_logging("monitor_net", &args.log_dir, &args.log_level)
        .context("Failed to initialize logging")?;

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    config
        .apply_options(&args.overrides())
        .context("Invalid command line option")?;
    info!("{}", config);

    let bus = Arc::new(EventBus::from_config(&config.events));
    bus.add_subscriber(
        Arc::new(StatusLogger::default()),
        &[
            EventKind::NetworkStatusChange,
            EventKind::NetworkCommunicationStatus,
            EventKind::StatusMessage,
        ],
    )?;

    let service = NetworkService::new(config.network, Arc::clone(&bus))?;
    service.attach()?;

    let online = service.check_network_status(true).await;
    info!(online, "Monitoring network every {} seconds...", args.interval);

    let period = Duration::from_secs(args.interval.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let online = service.check_network_status(false).await;
                if !online {
                    error!(urls = ?service.config().conn_check_urls, "Network unreachable");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    service.detach();
    bus.shutdown().await;
    info!(bytes = service.bytes_downloaded(), "Monitor stopped");
    Ok(())
}
