//! Outbound pacing for request bursts
//!
//! A resync fans out hundreds of requests at once. The pacer queues them and
//! drains the queue in fixed-size bursts so the remote's UDP buffer is not
//! overrun. Order is preserved.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rosc::OscType;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::PacerConfig;
use crate::osc::OscSink;

type Queued = (String, Vec<OscType>);

/// Cloneable handle that enqueues messages for the drain task
#[derive(Clone)]
pub struct Pacer {
    tx: mpsc::UnboundedSender<Queued>,
    backlog: Arc<AtomicUsize>,
}

impl Pacer {
    /// Start the drain task forwarding to `sink`
    pub fn spawn(
        sink: Arc<dyn OscSink>,
        config: &PacerConfig,
        token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(drain_loop(
            rx,
            sink,
            config.burst.max(1),
            config.interval(),
            backlog.clone(),
            token,
        ));

        (Self { tx, backlog }, handle)
    }

    /// Messages queued but not yet handed to the sink
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }
}

impl OscSink for Pacer {
    /// Queue for paced delivery; false only when the drain task is gone
    fn send(&self, address: &str, args: Vec<OscType>) -> bool {
        self.backlog.fetch_add(1, Ordering::Relaxed);
        if self.tx.send((address.to_string(), args)).is_err() {
            self.backlog.fetch_sub(1, Ordering::Relaxed);
            debug!("Pacer stopped, dropping {}", address);
            return false;
        }
        true
    }

    fn queued(&self) -> usize {
        self.backlog()
    }
}

async fn drain_loop(
    mut rx: mpsc::UnboundedReceiver<Queued>,
    sink: Arc<dyn OscSink>,
    burst: usize,
    interval: Duration,
    backlog: Arc<AtomicUsize>,
    token: CancellationToken,
) {
    loop {
        // Block until there is work
        let first = tokio::select! {
            _ = token.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let mut batch = vec![first];
        while batch.len() < burst {
            match rx.try_recv() {
                Ok(msg) => batch.push(msg),
                Err(_) => break,
            }
        }

        let sent = batch.len();
        for (address, args) in batch {
            sink.send(&address, args);
        }
        backlog.fetch_sub(sent, Ordering::Relaxed);
        trace!("Pacer burst of {} ({} queued)", sent, backlog.load(Ordering::Relaxed));

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("Pacer drain task stopped");
}
