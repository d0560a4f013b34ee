//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `UNDERSTUDY_LOG_LEVEL` and `UNDERSTUDY_CHANNEL_BIND` env
//! overrides.

use std::{env, fs, path::{Path, PathBuf}, time::Duration};

use serde::Deserialize;

use crate::error::HarnessError;

/// How inbound requests are routed to connected clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Every connected client receives every request; first reply wins.
    Broadcast,
    /// Each client owns one gateway port; only that port routes to it.
    PortPerClient,
}

impl DispatchMode {
    fn parse(s: &str) -> Result<Self, HarnessError> {
        match s {
            "broadcast" => Ok(Self::Broadcast),
            "port-per-client" => Ok(Self::PortPerClient),
            other => Err(HarnessError::Config(format!(
                "unknown gateway mode '{other}' (expected \"broadcast\" or \"port-per-client\")"
            ))),
        }
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Ports the gateway attempts to bind. Ports that fail to bind are
    /// logged and skipped; at least one must succeed.
    pub ports: Vec<u16>,
    pub mode: DispatchMode,
    /// How long a dispatched request waits for a client reply.
    pub reply_timeout: Duration,
}

/// Message-channel listener configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Socket address the channel listener binds to.
    pub bind: String,
}

/// Admin surface configuration.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// How many completed exchanges the traffic log retains.
    pub traffic_capacity: usize,
}

/// Fully-resolved harness configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub gateway: GatewayConfig,
    pub channel: ChannelConfig,
    pub admin: AdminConfig,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    harness: RawHarness,
    #[serde(default)]
    gateway: RawGateway,
    #[serde(default)]
    channel: RawChannel,
    #[serde(default)]
    admin: RawAdmin,
}

#[derive(Deserialize)]
struct RawHarness {
    #[serde(default = "default_log_level")]
    log_level: String,
}

#[derive(Deserialize)]
struct RawGateway {
    #[serde(default = "default_gateway_ports")]
    ports: Vec<u16>,
    #[serde(default = "default_gateway_mode")]
    mode: String,
    #[serde(default = "default_reply_timeout_ms")]
    reply_timeout_ms: u64,
}

#[derive(Deserialize)]
struct RawChannel {
    #[serde(default = "default_channel_bind")]
    bind: String,
}

#[derive(Deserialize)]
struct RawAdmin {
    #[serde(default = "default_traffic_capacity")]
    traffic_capacity: usize,
}

impl Default for RawHarness {
    fn default() -> Self {
        Self { log_level: default_log_level() }
    }
}

impl Default for RawGateway {
    fn default() -> Self {
        Self {
            ports: default_gateway_ports(),
            mode: default_gateway_mode(),
            reply_timeout_ms: default_reply_timeout_ms(),
        }
    }
}

impl Default for RawChannel {
    fn default() -> Self {
        Self { bind: default_channel_bind() }
    }
}

impl Default for RawAdmin {
    fn default() -> Self {
        Self { traffic_capacity: default_traffic_capacity() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_gateway_ports() -> Vec<u16> {
    vec![4545]
}

fn default_gateway_mode() -> String {
    "port-per-client".to_string()
}

fn default_reply_timeout_ms() -> u64 {
    5000
}

fn default_channel_bind() -> String {
    "127.0.0.1:4540".to_string()
}

fn default_traffic_capacity() -> usize {
    256
}

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load(path: Option<&Path>) -> Result<Config, HarnessError> {
    let log_level_override = env::var("UNDERSTUDY_LOG_LEVEL").ok();
    let channel_bind_override = env::var("UNDERSTUDY_CHANNEL_BIND").ok();
    load_from(
        path.unwrap_or(Path::new("config/default.toml")),
        log_level_override.as_deref(),
        channel_bind_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    log_level_override: Option<&str>,
    channel_bind_override: Option<&str>,
) -> Result<Config, HarnessError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| HarnessError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| HarnessError::Config(format!("parse error in {}: {e}", path.display())))?;

    let log_level = log_level_override
        .unwrap_or(&parsed.harness.log_level)
        .to_string();
    let bind = channel_bind_override
        .unwrap_or(&parsed.channel.bind)
        .to_string();

    if parsed.gateway.ports.is_empty() {
        return Err(HarnessError::Config(
            "gateway.ports must list at least one port".into(),
        ));
    }
    let mode = DispatchMode::parse(&parsed.gateway.mode)?;

    Ok(Config {
        log_level,
        gateway: GatewayConfig {
            ports: parsed.gateway.ports,
            mode,
            reply_timeout: Duration::from_millis(parsed.gateway.reply_timeout_ms),
        },
        channel: ChannelConfig { bind },
        admin: AdminConfig {
            traffic_capacity: parsed.admin.traffic_capacity.max(1),
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — ephemeral ports, short reply timeout.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            log_level: "info".into(),
            gateway: GatewayConfig {
                ports: vec![0],
                mode: DispatchMode::PortPerClient,
                reply_timeout: Duration::from_millis(200),
            },
            channel: ChannelConfig { bind: "127.0.0.1:0".into() },
            admin: AdminConfig { traffic_capacity: 32 },
        }
    }
}
