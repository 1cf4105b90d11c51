//! Server configuration module
//! Handles runtime configuration parameters for the relay server

use crate::constants::{
    DEFAULT_COLLABORATOR_TIMEOUT, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_GEMINI_ENDPOINT,
    DEFAULT_GEMINI_MODEL, DEFAULT_HOST, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PING_INTERVAL,
    DEFAULT_PORT, ROOM_LIFETIME,
};
use crate::core::rate_limiter::RateLimitConfig;
use crate::error::{RelayError, Result};
use std::env;
use std::fmt;
use std::time::Duration;

/// Server configuration parameters
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Enables the generative-text collaborator when set
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_endpoint: String,
    /// Upper bound on a single collaborator call
    pub collaborator_timeout: Duration,
    /// Take the client identity from `X-Forwarded-For`
    pub trust_proxy: bool,
    /// Maximum inbound frame size in bytes
    pub max_frame_size: usize,
    /// How often live connections are pinged
    pub ping_interval: Duration,
    /// Silence after which a connection is dropped
    pub connection_timeout: Duration,
    pub room_lifetime: Duration,
    pub rate_limits: RateLimitConfig,
    /// TLS configuration
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub enable_tls: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
            trust_proxy: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            ping_interval: DEFAULT_PING_INTERVAL,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            room_lifetime: ROOM_LIFETIME,
            rate_limits: RateLimitConfig::default(),
            tls_cert_path: None,
            tls_key_path: None,
            enable_tls: false,
        }
    }
}

// The API key must never end up in logs
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field(
                "gemini_api_key",
                &self.gemini_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("gemini_model", &self.gemini_model)
            .field("gemini_endpoint", &self.gemini_endpoint)
            .field("collaborator_timeout", &self.collaborator_timeout)
            .field("trust_proxy", &self.trust_proxy)
            .field("max_frame_size", &self.max_frame_size)
            .field("ping_interval", &self.ping_interval)
            .field("connection_timeout", &self.connection_timeout)
            .field("room_lifetime", &self.room_lifetime)
            .field("rate_limits", &self.rate_limits)
            .field("enable_tls", &self.enable_tls)
            .field("tls_cert_path", &self.tls_cert_path)
            .field("tls_key_path", &self.tls_key_path)
            .finish()
    }
}

fn parse_flag(value: &str) -> bool {
    value.to_lowercase() == "true" || value == "1"
}

fn parse_secs(name: &str, value: String) -> Result<Duration> {
    let secs: u64 = parse_number(name, value)?;
    if secs == 0 {
        return Err(RelayError::ConfigError(format!(
            "{} must be greater than zero",
            name
        )));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_number<T: std::str::FromStr>(name: &str, value: String) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RelayError::ConfigError(format!("{} has an invalid value: {}", name, value)))
}

impl ServerConfig {
    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("UPLINK_HOST").unwrap_or(defaults.host);
        let port = match lookup("UPLINK_PORT").or_else(|| lookup("PORT")) {
            Some(value) => parse_number("UPLINK_PORT", value)?,
            None => defaults.port,
        };

        let gemini_api_key = lookup("GEMINI_API_KEY").filter(|key| !key.trim().is_empty());
        let gemini_model = lookup("UPLINK_GEMINI_MODEL").unwrap_or(defaults.gemini_model);
        let gemini_endpoint = lookup("UPLINK_GEMINI_ENDPOINT")
            .map(|endpoint| endpoint.trim_end_matches('/').to_string())
            .unwrap_or(defaults.gemini_endpoint);

        let collaborator_timeout = match lookup("UPLINK_COLLABORATOR_TIMEOUT_SECS") {
            Some(value) => parse_secs("UPLINK_COLLABORATOR_TIMEOUT_SECS", value)?,
            None => defaults.collaborator_timeout,
        };

        let trust_proxy = lookup("UPLINK_TRUST_PROXY")
            .map(|v| parse_flag(&v))
            .unwrap_or(false); // Forwarded headers are spoofable without a proxy in front

        let max_frame_size = match lookup("UPLINK_MAX_FRAME_SIZE") {
            Some(value) => parse_number("UPLINK_MAX_FRAME_SIZE", value)?,
            None => defaults.max_frame_size,
        };
        if max_frame_size == 0 {
            return Err(RelayError::ConfigError(
                "UPLINK_MAX_FRAME_SIZE must be greater than zero".to_string(),
            ));
        }

        let ping_interval = match lookup("UPLINK_PING_INTERVAL_SECS") {
            Some(value) => parse_secs("UPLINK_PING_INTERVAL_SECS", value)?,
            None => defaults.ping_interval,
        };
        let connection_timeout = match lookup("UPLINK_CONNECTION_TIMEOUT_SECS") {
            Some(value) => parse_secs("UPLINK_CONNECTION_TIMEOUT_SECS", value)?,
            None => defaults.connection_timeout,
        };
        // A healthy client must get at least one ping before it times out
        if connection_timeout <= ping_interval {
            return Err(RelayError::ConfigError(
                "UPLINK_CONNECTION_TIMEOUT_SECS must exceed UPLINK_PING_INTERVAL_SECS".to_string(),
            ));
        }

        // TLS configuration
        let enable_tls = lookup("UPLINK_ENABLE_TLS")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        let tls_cert_path = lookup("UPLINK_TLS_CERT_PATH");
        let tls_key_path = lookup("UPLINK_TLS_KEY_PATH");

        if enable_tls {
            match (&tls_cert_path, &tls_key_path) {
                (Some(cert_path), Some(key_path)) => {
                    if !std::path::Path::new(cert_path).exists() {
                        return Err(RelayError::ConfigError(format!(
                            "TLS certificate file does not exist: {}",
                            cert_path
                        )));
                    }
                    if !std::path::Path::new(key_path).exists() {
                        return Err(RelayError::ConfigError(format!(
                            "TLS private key file does not exist: {}",
                            key_path
                        )));
                    }
                }
                _ => {
                    return Err(RelayError::ConfigError(
                        "TLS is enabled but UPLINK_TLS_CERT_PATH or UPLINK_TLS_KEY_PATH is not set"
                            .to_string(),
                    ))
                }
            }
        }

        Ok(Self {
            host,
            port,
            gemini_api_key,
            gemini_model,
            gemini_endpoint,
            collaborator_timeout,
            trust_proxy,
            max_frame_size,
            ping_interval,
            connection_timeout,
            room_lifetime: defaults.room_lifetime,
            rate_limits: defaults.rate_limits,
            tls_cert_path,
            tls_key_path,
            enable_tls,
        })
    }

    pub fn collaborator_enabled(&self) -> bool {
        self.gemini_api_key.is_some()
    }
}
