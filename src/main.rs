//! LiveLink GW - control surface <-> Ableton Live sync over OSC

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livelink_gw::config::{AppConfig, ConfigWatcher, OscConfig};
use livelink_gw::connection::ConnectionManager;
use livelink_gw::events::{Event, EventBus, SettingsChange};
use livelink_gw::osc::{OscSink, OscTransport};
use livelink_gw::rate::{Pacer, UiFeed};
use livelink_gw::session::SessionStore;
use livelink_gw::sync::SyncController;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// LiveLink Gateway - mirror and drive an Ableton Live session over OSC
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Host running Live with the OSC remote script
    #[arg(long, env = "LIVE_HOST")]
    host: Option<String>,

    /// Port Live listens on
    #[arg(long, env = "LIVE_SEND_PORT")]
    send_port: Option<u16>,

    /// Local port Live replies to
    #[arg(long, env = "LIVE_RECEIVE_PORT")]
    receive_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    /// One JSON object per line
    Json,
}

impl Args {
    fn apply_overrides(&self, osc: &mut OscConfig) {
        if let Some(host) = &self.host {
            osc.host = host.clone();
        }
        if let Some(port) = self.send_port {
            osc.send_port = port;
        }
        if let Some(port) = self.receive_port {
            osc.receive_port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.log_format)?;

    info!("Starting LiveLink GW v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // A missing file runs on defaults without hot reload
    let (config_watcher, mut config) = if Path::new(&args.config).exists() {
        let watcher = ConfigWatcher::new(&args.config).await?;
        info!("Configuration loaded successfully with hot-reload enabled");
        let initial = watcher.current().clone();
        (Some(watcher), initial)
    } else {
        warn!("⚠️  {} not found, using defaults", args.config);
        (None, AppConfig::default())
    };
    args.apply_overrides(&mut config.osc);
    config.validate()?;

    run_app(args, config, config_watcher).await?;

    info!("LiveLink GW shutdown complete");
    Ok(())
}

async fn run_app(args: Args, config: AppConfig, mut config_watcher: Option<ConfigWatcher>) -> Result<()> {
    let root = CancellationToken::new();

    let bus = EventBus::new();
    let store = Arc::new(SessionStore::new(config.session.tracks, config.session.scenes));
    let transport = Arc::new(OscTransport::new());
    let connection = Arc::new(ConnectionManager::new(
        transport.clone(),
        config.lifecycle.clone(),
    ));

    let (pacer, pacer_task) = Pacer::spawn(
        transport.clone() as Arc<dyn OscSink>,
        &config.rate.pacer,
        root.child_token(),
    );

    let controller = Arc::new(
        SyncController::new(
            bus.clone(),
            store,
            transport.clone(),
            Arc::new(pacer.clone()),
            config.sync.clone(),
            config.rate.clip_cache_ttl(),
        )
        .with_connection(connection.clone()),
    );
    controller.attach();
    controller.install_handlers(&transport);
    let reconciler = controller.spawn_reconciler(root.child_token());
    info!("Sync controller ready ({} OSC handlers)", transport.handlers_count());

    let mut feed = UiFeed::subscribe(&bus, &config.rate);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut endpoint = config.osc.endpoint();
    tokio::select! {
        _ = connect_with_backoff(&connection, &config.osc) => {
            controller.request_initial_sync();
        }
        _ = &mut shutdown => {
            info!("Shutdown requested before connecting");
            root.cancel();
            return Ok(());
        }
    }

    let mut status_ticker = tokio::time::interval(STATUS_INTERVAL);
    status_ticker.tick().await;

    info!("Starting main event loop...");
    loop {
        tokio::select! {
            Some(batch) = feed.next_batch() => {
                for event in batch {
                    match event {
                        Event::UiTrackBatch(_) | Event::UiClipBatch(_) => bus.publish(event),
                        other => debug!("UI feed: {}", other.topic()),
                    }
                }
            }

            Some(mut new_config) = next_config(&mut config_watcher) => {
                info!("📝 Configuration file changed, reloading...");
                args.apply_overrides(&mut new_config.osc);
                let new_endpoint = new_config.osc.endpoint();
                if new_endpoint != endpoint {
                    endpoint = new_endpoint.clone();
                    bus.publish(Event::SettingsChanged(SettingsChange { endpoint: new_endpoint }));
                } else {
                    info!("✅ Configuration reloaded, endpoint unchanged");
                }
            }

            _ = status_ticker.tick() => {
                let status = controller.status();
                info!(
                    "Status: connected={} state={} sent={} received={} pending={} pacer_backlog={}",
                    status.connected,
                    connection.state(),
                    status.messages_sent,
                    status.messages_received,
                    status.pending_writes,
                    pacer.backlog()
                );
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    drop(feed);
    connection.disconnect().await;
    root.cancel();
    let _ = tokio::time::timeout(config.lifecycle.shutdown_timeout(), async {
        let _ = reconciler.await;
        let _ = pacer_task.await;
    })
    .await;

    Ok(())
}

/// Retry until the receive port can be bound, backing off 1s per attempt
async fn connect_with_backoff(connection: &ConnectionManager, osc: &OscConfig) {
    let mut attempt: u32 = 0;
    loop {
        match connection.connect(osc.endpoint()).await {
            Ok(()) => return,
            Err(e) => {
                attempt += 1;
                let delay = (Duration::from_secs(1) * attempt).min(MAX_BACKOFF);
                warn!("Connect failed ({}), retrying in {:?}", e.reason(), delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init(),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}
