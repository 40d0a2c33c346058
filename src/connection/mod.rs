//! Connection lifecycle: bind, link, heartbeat, directory polling, teardown
//!
//! The manager never reconnects on its own. A dead peer shows up as
//! `Degraded` and the caller decides whether to call `connect` again.

mod heartbeat;
mod supervisor;

pub use heartbeat::Heartbeat;
pub use supervisor::TaskSupervisor;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rosc::{OscMessage, OscType};
use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LifecycleConfig;
use crate::error::ConnectError;
use crate::osc::{Endpoint, OscTransport};

/// Heartbeat request, also answered by the remote on the same address
pub const ADDR_TEST: &str = "/live/test";
/// Remote-initiated liveness ping
pub const ADDR_PING: &str = "/live/ping";
pub const ADDR_PONG: &str = "/push/pong";
pub const ADDR_STATUS: &str = "/live/status";
/// Directory request, polled to detect structural changes
pub const ADDR_TRACK_NAMES: &str = "/live/song/get/track_names";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Linked, but the heartbeat has gone quiet
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// Serializable connection snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub state: ConnectionState,
    pub send_endpoint: Option<String>,
    pub receive_port: Option<u16>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub last_message_time: Option<DateTime<Utc>>,
    /// Milliseconds since the last heartbeat reply, None when disconnected
    pub ping_age_ms: Option<u64>,
    pub connection_attempts: u64,
    pub handlers_count: usize,
}

pub struct ConnectionManager {
    transport: Arc<OscTransport>,
    config: LifecycleConfig,
    /// Base state; Degraded is derived from the heartbeat on read
    state: RwLock<ConnectionState>,
    endpoint: RwLock<Option<Endpoint>>,
    attempts: AtomicU64,
    heartbeat: Arc<Heartbeat>,
    /// Held across connect/disconnect so they never interleave
    supervisor: tokio::sync::Mutex<Option<TaskSupervisor>>,
}

impl ConnectionManager {
    /// Create the manager and register the built-in liveness handlers
    pub fn new(transport: Arc<OscTransport>, config: LifecycleConfig) -> Self {
        let heartbeat = Arc::new(Heartbeat::new(config.heartbeat_timeout()));
        register_builtin_handlers(&transport, &heartbeat);

        Self {
            transport,
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            endpoint: RwLock::new(None),
            attempts: AtomicU64::new(0),
            heartbeat,
            supervisor: tokio::sync::Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<OscTransport> {
        &self.transport
    }

    /// Connect to `endpoint`, tearing down any live connection first
    pub async fn connect(&self, endpoint: Endpoint) -> Result<(), ConnectError> {
        let mut guard = self.supervisor.lock().await;
        if let Some(previous) = guard.take() {
            debug!("Replacing live connection");
            self.teardown(previous).await;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        *self.state.write() = ConnectionState::Connecting;
        info!(
            "🔌 Connecting to Live at {} (listening on {}, attempt {})",
            endpoint.send_target(),
            endpoint.listen_addr(),
            attempt
        );

        let socket = match self.transport.bind_receiver(&endpoint).await {
            Ok(socket) => socket,
            Err(e) => return Err(self.fail(e)),
        };
        if let Err(e) = self.transport.open_link(&endpoint) {
            return Err(self.fail(e));
        }

        self.heartbeat.reset();
        let mut supervisor = TaskSupervisor::new();

        let transport = self.transport.clone();
        supervisor.spawn("osc-receiver", move |token| transport.run_receiver(socket, token));

        // Greeting doubles as the first liveness probe
        self.transport
            .send(ADDR_TEST, vec![OscType::String("hello".to_string())]);

        *self.state.write() = ConnectionState::Connected;
        *self.endpoint.write() = Some(endpoint);

        let transport = self.transport.clone();
        let heartbeat = self.heartbeat.clone();
        let interval = self.config.heartbeat_interval();
        supervisor.spawn("heartbeat", move |token| {
            heartbeat_loop(transport, heartbeat, interval, token)
        });

        let transport = self.transport.clone();
        let interval = self.config.poll_interval();
        supervisor.spawn("directory-poll", move |token| {
            directory_poll_loop(transport, interval, token)
        });

        *guard = Some(supervisor);
        info!("✅ Connected to Live");
        Ok(())
    }

    /// Stop all connection tasks and release the sockets; safe to repeat
    pub async fn disconnect(&self) {
        let mut guard = self.supervisor.lock().await;
        match guard.take() {
            Some(supervisor) => {
                self.teardown(supervisor).await;
                info!("Disconnected from Live");
            }
            None => debug!("disconnect() while not connected"),
        }
    }

    async fn teardown(&self, supervisor: TaskSupervisor) {
        let abandoned = supervisor.shutdown(self.config.shutdown_timeout()).await;
        if abandoned > 0 {
            warn!("{} connection task(s) abandoned during teardown", abandoned);
        }
        self.transport.close_link();
        *self.state.write() = ConnectionState::Disconnected;
    }

    fn fail(&self, error: ConnectError) -> ConnectError {
        warn!("❌ Connection failed ({}): {}", error.reason(), error);
        self.transport.close_link();
        *self.state.write() = ConnectionState::Disconnected;
        error
    }

    /// True while linked, including Degraded
    pub fn is_connected(&self) -> bool {
        matches!(*self.state.read(), ConnectionState::Connected)
    }

    pub fn is_alive(&self) -> bool {
        self.is_connected() && self.heartbeat.is_alive()
    }

    pub fn state(&self) -> ConnectionState {
        let base = *self.state.read();
        if base == ConnectionState::Connected && !self.heartbeat.is_alive() {
            ConnectionState::Degraded
        } else {
            base
        }
    }

    pub fn connection_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Endpoint of the current (or last successful) connection
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.read().clone()
    }

    pub fn get_connection_info(&self) -> ConnectionInfo {
        let stats = self.transport.stats();
        let endpoint = self.endpoint();
        let connected = self.is_connected();

        ConnectionInfo {
            connected,
            state: self.state(),
            send_endpoint: endpoint.as_ref().map(Endpoint::send_target),
            receive_port: endpoint.as_ref().map(|e| e.receive_port),
            messages_sent: stats.messages_sent,
            messages_received: stats.messages_received,
            last_message_time: stats.last_message_time,
            ping_age_ms: connected.then(|| self.heartbeat.ping_age().as_millis() as u64),
            connection_attempts: self.connection_attempts(),
            handlers_count: self.transport.handlers_count(),
        }
    }
}

fn register_builtin_handlers(transport: &Arc<OscTransport>, heartbeat: &Arc<Heartbeat>) {
    // Weak: the transport owns its handlers
    let weak: Weak<OscTransport> = Arc::downgrade(transport);
    let hb = heartbeat.clone();
    transport.register_handler(ADDR_PING, move |_msg: &OscMessage| {
        hb.record_pong();
        if let Some(transport) = weak.upgrade() {
            transport.send(ADDR_PONG, vec![]);
        }
        Ok(())
    });

    let hb = heartbeat.clone();
    transport.register_handler(ADDR_TEST, move |msg: &OscMessage| {
        debug!("Heartbeat reply {:?}", msg.args);
        hb.record_pong();
        Ok(())
    });

    transport.register_handler(ADDR_STATUS, |msg: &OscMessage| {
        info!("Live status: {:?}", msg.args);
        Ok(())
    });
}

async fn heartbeat_loop(
    transport: Arc<OscTransport>,
    heartbeat: Arc<Heartbeat>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut alive = true;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                transport.send(ADDR_TEST, vec![]);

                let now_alive = heartbeat.is_alive();
                if alive && !now_alive {
                    warn!("⚠️  No heartbeat reply for {:?}, link degraded", heartbeat.ping_age());
                } else if !alive && now_alive {
                    info!("Heartbeat restored");
                }
                alive = now_alive;
            }
        }
    }
}

async fn directory_poll_loop(transport: Arc<OscTransport>, period: Duration, token: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                transport.send(ADDR_TRACK_NAMES, vec![]);
            }
        }
    }
}
