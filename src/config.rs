//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `STREAMNODE_API_URL`,
//!    `STREAMNODE_GATEWAY_URL`, `STREAMNODE_ACCOUNTS`, `STREAMNODE_PROXIES`
//! 2. **Config file** — path via `--config <path>`, or `streamnode.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [service]
//! api_url = "https://api.allstream.ai"
//! gateway_url = "wss://gw0.streamapp365.com/connect"
//!
//! [auth]
//! mode = "password"            # "password" (email:password lines) or "token"
//!
//! [accounts]
//! file = "accounts.txt"
//!
//! [proxy]
//! enabled = false              # also enabled by the --proxy flag
//! file = "proxy.txt"
//! fan_out = false              # true = one session per account x proxy pair
//!
//! [session]
//! heartbeat_interval_secs = 60
//! persist_device_id = false    # keep the device id across reconnects
//! startup_stagger_ms = 0       # delay between session launches
//!
//! [reconnect]
//! policy = "fixed"             # "fixed" or "exponential"
//! delay_secs = 5
//! max_delay_secs = 60          # exponential cap
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote service endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Base URL for the HTTP API (login, identity, status).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// WebSocket gateway URL that sessions register against.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
}

/// How credential lines are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// `email:password` per line, exchanged for a token at login.
    Password,
    /// One pre-issued bearer token per line; identity is looked up instead.
    Token,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_mode")]
    pub mode: AuthMode,
}

/// Account list source.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountsConfig {
    /// Path to the credential list (default `accounts.txt`).
    #[serde(default = "default_accounts_file")]
    pub file: String,
}

/// Proxy list source and binding mode.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Route all HTTP and WebSocket traffic through the proxy list.
    #[serde(default)]
    pub enabled: bool,
    /// Path to the proxy list (default `proxy.txt`). Entries may be bare
    /// `host:port`; a missing scheme is normalized to `http://`.
    #[serde(default = "default_proxy_file")]
    pub file: String,
    /// Launch one session per account x proxy pair instead of binding
    /// account `i` to proxy `i mod len`.
    #[serde(default)]
    pub fan_out: bool,
}

/// Per-session timing and identity settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Seconds between keepalive pings and status polls (default 60).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Keep the device id across reconnects instead of regenerating it on
    /// every registration (default false — the gateway sees a new device on
    /// each reconnect).
    #[serde(default)]
    pub persist_device_id: bool,
    /// Milliseconds between session launches at startup (default 0 — all
    /// sessions start at once).
    #[serde(default)]
    pub startup_stagger_ms: u64,
}

/// Delay policy between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// The same delay before every attempt.
    Fixed,
    /// Doubling delay up to `max_delay_secs`, reset after a successful
    /// connection.
    Exponential,
}

/// Reconnection settings. Retries are unbounded; only the spacing varies.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_policy")]
    pub policy: ReconnectPolicy,
    /// Base delay in seconds between attempts (default 5). The first
    /// reconnect after a live connection drops is immediate.
    #[serde(default = "default_reconnect_delay")]
    pub delay_secs: u64,
    /// Max delay in seconds for the exponential policy (default 60).
    #[serde(default = "default_reconnect_max_delay")]
    pub max_delay_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_api_url() -> String {
    "https://api.allstream.ai".to_string()
}
fn default_gateway_url() -> String {
    "wss://gw0.streamapp365.com/connect".to_string()
}
fn default_auth_mode() -> AuthMode {
    AuthMode::Password
}
fn default_accounts_file() -> String {
    "accounts.txt".to_string()
}
fn default_proxy_file() -> String {
    "proxy.txt".to_string()
}
fn default_heartbeat_interval() -> u64 {
    60
}
fn default_reconnect_policy() -> ReconnectPolicy {
    ReconnectPolicy::Fixed
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_reconnect_max_delay() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            gateway_url: default_gateway_url(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            file: default_accounts_file(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: default_proxy_file(),
            fan_out: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            persist_device_id: false,
            startup_stagger_ms: 0,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            policy: default_reconnect_policy(),
            delay_secs: default_reconnect_delay(),
            max_delay_secs: default_reconnect_max_delay(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist and parse. Otherwise
    /// `streamnode.toml` in the current directory is used when present,
    /// falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .map_err(|e| format!("failed to read config file {p}: {e}"))?;
            toml::from_str(&content).map_err(|e| format!("failed to parse config file {p}: {e}"))?
        } else if Path::new("streamnode.toml").exists() {
            let content = std::fs::read_to_string("streamnode.toml")
                .map_err(|e| format!("failed to read streamnode.toml: {e}"))?;
            toml::from_str(&content).map_err(|e| format!("failed to parse streamnode.toml: {e}"))?
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(url) = std::env::var("STREAMNODE_API_URL") {
            config.service.api_url = url;
        }
        if let Ok(url) = std::env::var("STREAMNODE_GATEWAY_URL") {
            config.service.gateway_url = url;
        }
        if let Ok(file) = std::env::var("STREAMNODE_ACCOUNTS") {
            config.accounts.file = file;
        }
        if let Ok(file) = std::env::var("STREAMNODE_PROXIES") {
            config.proxy.file = file;
        }

        Ok(config)
    }
}
