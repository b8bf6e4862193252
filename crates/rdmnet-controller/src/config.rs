// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration.

use crate::backoff::BackoffPolicy;
use crate::health::HeartbeatTiming;
use crate::pdu::{Cid, SOURCE_NAME_SIZE};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// E1.33 TCP port devices listen on.
pub const E133_PORT: u16 = 5569;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid device address '{0}'")]
    InvalidDevice(String),
}

/// Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Default device port when an address has none.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Devices to manage at startup (`ip` or `ip:port`).
    #[serde(default)]
    pub devices: Vec<String>,

    /// Connect timeout (milliseconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// First retry delay (milliseconds)
    #[serde(default = "default_retry_floor")]
    pub retry_floor_ms: u64,

    /// Longest retry delay (milliseconds)
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling_ms: u64,

    #[serde(default = "default_growth_factor")]
    pub retry_growth_factor: f64,

    /// Heartbeat send interval (milliseconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Silence tolerated from a designated device (milliseconds)
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,

    /// Close unconfirmed sessions after this long (milliseconds, 0 = never)
    #[serde(default = "default_designation_timeout")]
    pub designation_timeout_ms: u64,

    /// Largest root-layer block accepted from a device (bytes)
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,

    /// Outgoing frames buffered per session
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Manager event channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Name placed in outgoing E1.33 headers
    #[serde(default = "default_source_name")]
    pub source_name: String,

    /// Controller component identifier. A random one is used when unset.
    #[serde(default)]
    pub cid: Option<Uuid>,

    /// Statistics reporting interval (seconds, 0 = disabled)
    #[serde(default)]
    pub stats_interval_secs: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    E133_PORT
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_retry_floor() -> u64 {
    5_000
}

fn default_retry_ceiling() -> u64 {
    30_000
}

fn default_growth_factor() -> f64 {
    crate::backoff::DEFAULT_GROWTH_FACTOR
}

fn default_heartbeat_interval() -> u64 {
    5_000
}

fn default_heartbeat_timeout() -> u64 {
    // 2.5 heartbeat intervals
    12_500
}

fn default_designation_timeout() -> u64 {
    0
}

fn default_max_block_size() -> usize {
    64 * 1024
}

fn default_queue_capacity() -> usize {
    256
}

fn default_event_capacity() -> usize {
    1024
}

fn default_source_name() -> String {
    "rdmnet-controller".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            devices: Vec::new(),
            connect_timeout_ms: default_connect_timeout(),
            retry_floor_ms: default_retry_floor(),
            retry_ceiling_ms: default_retry_ceiling(),
            retry_growth_factor: default_growth_factor(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            designation_timeout_ms: default_designation_timeout(),
            max_block_size: default_max_block_size(),
            queue_capacity: default_queue_capacity(),
            event_capacity: default_event_capacity(),
            source_name: default_source_name(),
            cid: None,
            stats_interval_secs: 0,
            log_level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".into()));
        }
        if self.retry_floor_ms == 0 {
            return Err(ConfigError::Invalid("retry_floor_ms must be > 0".into()));
        }
        if self.retry_ceiling_ms < self.retry_floor_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_ceiling_ms ({}) is below retry_floor_ms ({})",
                self.retry_ceiling_ms, self.retry_floor_ms
            )));
        }
        if self.retry_growth_factor.is_nan() || self.retry_growth_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry_growth_factor must be >= 1.0, got {}",
                self.retry_growth_factor
            )));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_ms must be > 0".into(),
            ));
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be > 0".into()));
        }
        if self.max_block_size == 0 {
            return Err(ConfigError::Invalid("max_block_size must be > 0".into()));
        }
        if self.source_name.len() >= SOURCE_NAME_SIZE {
            return Err(ConfigError::Invalid(format!(
                "source_name is {} bytes, limit is {}",
                self.source_name.len(),
                SOURCE_NAME_SIZE - 1
            )));
        }

        for device in &self.devices {
            self.resolve_endpoint(device)?;
        }

        Ok(())
    }

    /// Parse `ip` or `ip:port`, filling in the configured port.
    pub fn resolve_endpoint(&self, device: &str) -> Result<SocketAddr, ConfigError> {
        let device = device.trim();
        if let Ok(addr) = device.parse::<SocketAddr>() {
            return Ok(addr);
        }
        device
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, self.port))
            .map_err(|_| ConfigError::InvalidDevice(device.to_string()))
    }

    /// Configured devices as endpoint addresses, duplicates removed.
    pub fn device_endpoints(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        let mut endpoints = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            let addr = self.resolve_endpoint(device)?;
            if !endpoints.contains(&addr) {
                endpoints.push(addr);
            }
        }
        Ok(endpoints)
    }

    pub fn add_device(&mut self, device: impl Into<String>) {
        self.devices.push(device.into());
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.retry_floor_ms),
            Duration::from_millis(self.retry_ceiling_ms),
        )
        .with_growth_factor(self.retry_growth_factor)
    }

    pub fn heartbeat_timing(&self) -> HeartbeatTiming {
        HeartbeatTiming {
            interval: Duration::from_millis(self.heartbeat_interval_ms),
            timeout: Duration::from_millis(self.heartbeat_timeout_ms),
        }
    }

    /// `None` when unconfirmed sessions may stay open indefinitely.
    pub fn designation_timeout(&self) -> Option<Duration> {
        (self.designation_timeout_ms > 0).then(|| Duration::from_millis(self.designation_timeout_ms))
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// The configured CID, or a fresh random one.
    pub fn cid(&self) -> Cid {
        self.cid.unwrap_or_else(Uuid::new_v4).into_bytes()
    }
}
