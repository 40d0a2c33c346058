//! Address pattern -> handler resolution

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use rosc::OscMessage;
use tracing::{debug, error, warn};

use super::pattern::AddressPattern;

/// Handler invoked for every message resolved to its pattern
pub type HandlerFn = Arc<dyn Fn(&OscMessage) -> anyhow::Result<()> + Send + Sync>;

/// Box a closure as a [`HandlerFn`]
pub fn handler_fn<F>(f: F) -> HandlerFn
where
    F: Fn(&OscMessage) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Exact patterns resolve by hash lookup; wildcard patterns keep
/// registration order so ties go to the earliest one.
#[derive(Default)]
pub struct HandlerTable {
    exact: HashMap<String, HandlerFn>,
    wildcard: Vec<(AddressPattern, HandlerFn)>,
    default: Option<HandlerFn>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `pattern`, replacing any previous handler for it
    pub fn register(&mut self, pattern: &str, handler: HandlerFn) {
        let pattern = AddressPattern::new(pattern);
        if pattern.is_exact() {
            self.exact.insert(pattern.as_str().to_string(), handler);
            return;
        }

        match self.wildcard.iter_mut().find(|(p, _)| *p == pattern) {
            Some(entry) => entry.1 = handler,
            None => self.wildcard.push((pattern, handler)),
        }
    }

    pub fn set_default(&mut self, handler: HandlerFn) {
        self.default = Some(handler);
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the handler for `address` along with the pattern that matched
    ///
    /// Exact match first, then the wildcard with the most literal segments,
    /// then the default handler.
    pub fn resolve(&self, address: &str) -> Option<(String, HandlerFn)> {
        if let Some(handler) = self.exact.get(address) {
            return Some((address.to_string(), handler.clone()));
        }

        let mut best: Option<&(AddressPattern, HandlerFn)> = None;
        for entry in &self.wildcard {
            if !entry.0.matches(address) {
                continue;
            }
            if best.map_or(true, |b| entry.0.specificity() > b.0.specificity()) {
                best = Some(entry);
            }
        }
        if let Some((pattern, handler)) = best {
            return Some((pattern.as_str().to_string(), handler.clone()));
        }

        self.default
            .as_ref()
            .map(|handler| ("<default>".to_string(), handler.clone()))
    }
}

/// Run a handler with error and panic isolation
///
/// Returns false when the handler failed. The caller must not hold the
/// table lock while calling this.
pub(crate) fn invoke(pattern: &str, handler: &HandlerFn, msg: &OscMessage) -> bool {
    match catch_unwind(AssertUnwindSafe(|| handler(msg))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Handler for {} failed on {}: {:#}", pattern, msg.addr, e);
            false
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Handler for {} panicked on {}: {}", pattern, msg.addr, detail);
            false
        }
    }
}

/// Fallback used when nothing else matches
pub(crate) fn log_unhandled(msg: &OscMessage) -> anyhow::Result<()> {
    debug!("Unhandled OSC message: {} {:?}", msg.addr, msg.args);
    Ok(())
}
