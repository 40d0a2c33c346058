//! Configuration management for LiveLink GW
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.
//! Every field has a default so an empty (or missing) file is a valid setup.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::osc::Endpoint;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub osc: OscConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Remote session endpoint
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OscConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_send_port")]
    pub send_port: u16,
    #[serde(default = "default_receive_port")]
    pub receive_port: u16,
    /// Local interface the receive socket binds to
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
}

/// Connection lifecycle timing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Bounded join applied to background tasks on disconnect
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

/// Throttle, batch, cache and pacing settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateConfig {
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default = "default_batch_window")]
    pub batch_window_ms: u64,
    #[serde(default = "default_cache_ttl")]
    pub clip_cache_ttl_ms: u64,
    #[serde(default)]
    pub pacer: PacerConfig,
}

/// Per update-kind minimum intervals
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThrottleConfig {
    /// Continuous controls: volume, pan, sends, tempo
    #[serde(default = "default_fader_interval")]
    pub fader_ms: u64,
    #[serde(default = "default_clip_status_interval")]
    pub clip_status_ms: u64,
    /// Track and clip names
    #[serde(default = "default_name_interval")]
    pub name_ms: u64,
    /// Everything else (mute/solo/arm)
    #[serde(default = "default_other_interval")]
    pub default_ms: u64,
}

/// Outbound pacing for resync bursts
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PacerConfig {
    #[serde(default = "default_pacer_burst")]
    pub burst: usize,
    #[serde(default = "default_pacer_interval")]
    pub interval_ms: u64,
}

/// Local session shape used before the remote track listing arrives
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_tracks")]
    pub tracks: usize,
    #[serde(default = "default_scenes")]
    pub scenes: usize,
}

/// Echo suppression and write reconciliation windows
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Grace period for continuous controls after a local write
    #[serde(default = "default_grace_fader")]
    pub lww_grace_fader_ms: u64,
    /// Grace period for discrete controls after a local write
    #[serde(default = "default_grace_toggle")]
    pub lww_grace_toggle_ms: u64,
    /// Pending writes older than this are assumed applied
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_ms: u64,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            send_port: default_send_port(),
            receive_port: default_receive_port(),
            listen_host: default_listen_host(),
        }
    }
}

impl OscConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            send_port: self.send_port,
            receive_port: self.receive_port,
            listen_host: self.listen_host.clone(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            poll_interval_ms: default_poll_interval(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl LifecycleConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            throttle: ThrottleConfig::default(),
            batch_window_ms: default_batch_window(),
            clip_cache_ttl_ms: default_cache_ttl(),
            pacer: PacerConfig::default(),
        }
    }
}

impl RateConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn clip_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.clip_cache_ttl_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            fader_ms: default_fader_interval(),
            clip_status_ms: default_clip_status_interval(),
            name_ms: default_name_interval(),
            default_ms: default_other_interval(),
        }
    }
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            burst: default_pacer_burst(),
            interval_ms: default_pacer_interval(),
        }
    }
}

impl PacerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracks: default_tracks(),
            scenes: default_scenes(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lww_grace_fader_ms: default_grace_fader(),
            lww_grace_toggle_ms: default_grace_toggle(),
            confirm_timeout_ms: default_confirm_timeout(),
        }
    }
}

impl SyncConfig {
    pub fn grace_fader(&self) -> Duration {
        Duration::from_millis(self.lww_grace_fader_ms)
    }

    pub fn grace_toggle(&self) -> Duration {
        Duration::from_millis(self.lww_grace_toggle_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty document deserializes as null; treat it as all defaults
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.osc.host.trim().is_empty() {
            anyhow::bail!("osc.host cannot be empty");
        }
        if self.osc.send_port == 0 {
            anyhow::bail!("osc.send_port must be non-zero");
        }
        if self.osc.receive_port == 0 {
            anyhow::bail!("osc.receive_port must be non-zero");
        }

        if self.lifecycle.heartbeat_interval_ms == 0 || self.lifecycle.poll_interval_ms == 0 {
            anyhow::bail!("lifecycle intervals must be non-zero");
        }
        if self.lifecycle.heartbeat_timeout_ms < self.lifecycle.heartbeat_interval_ms {
            anyhow::bail!(
                "lifecycle.heartbeat_timeout_ms ({}) must be >= heartbeat_interval_ms ({})",
                self.lifecycle.heartbeat_timeout_ms,
                self.lifecycle.heartbeat_interval_ms
            );
        }

        if self.rate.pacer.burst == 0 {
            anyhow::bail!("rate.pacer.burst must be at least 1");
        }

        if self.session.tracks == 0 || self.session.scenes == 0 {
            anyhow::bail!("session.tracks and session.scenes must be at least 1");
        }

        Ok(())
    }
}

// Default value functions
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_send_port() -> u16 { 11000 }
fn default_receive_port() -> u16 { 11001 }
fn default_listen_host() -> String { "127.0.0.1".to_string() }
fn default_heartbeat_interval() -> u64 { 5_000 }
fn default_heartbeat_timeout() -> u64 { 10_000 }
fn default_poll_interval() -> u64 { 5_000 }
fn default_shutdown_timeout() -> u64 { 2_000 }
fn default_batch_window() -> u64 { 50 }
fn default_cache_ttl() -> u64 { 30_000 }
fn default_fader_interval() -> u64 { 50 }
fn default_clip_status_interval() -> u64 { 100 }
fn default_name_interval() -> u64 { 200 }
fn default_other_interval() -> u64 { 100 }
fn default_pacer_burst() -> usize { 32 }
fn default_pacer_interval() -> u64 { 10 }
fn default_tracks() -> usize { 8 }
fn default_scenes() -> usize { 12 }
fn default_grace_fader() -> u64 { 300 }
fn default_grace_toggle() -> u64 { 50 }
fn default_confirm_timeout() -> u64 { 1_000 }
