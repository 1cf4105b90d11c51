//! Client identity extraction for WebSocket upgrades
//!
//! The identity keys the rate limiter. Proxy headers are only honoured when
//! the server is configured to sit behind a trusted reverse proxy, since any
//! client can send them.

use std::net::{IpAddr, SocketAddr};
use warp::hyper::HeaderMap;
use log::{debug, warn};

/// Identity used when neither a header nor a peer address is available
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Extract the client identity from headers and connection info
pub fn extract_client_identity(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        if let Some(ip) = forwarded_for(headers) {
            debug!("Using X-Forwarded-For client IP: {}", ip);
            return ip.to_string();
        }
    }

    match remote_addr {
        Some(addr) => addr.ip().to_string(),
        None => {
            warn!("No peer address available, rate limiting under '{}'", UNKNOWN_IDENTITY);
            UNKNOWN_IDENTITY.to_string()
        }
    }
}

/// Leftmost (original client) entry of `X-Forwarded-For`
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    match first.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!("Invalid IP format in X-Forwarded-For header: {}", first);
            None
        }
    }
}
