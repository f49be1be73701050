use std::net::SocketAddr;

use axum::http::HeaderMap;

use crate::rate_limit::UNKNOWN_CLIENT;

/// Derives the rate limiting key for an inbound request.
pub trait ClientKeyExtractor: Send + Sync {
    fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String;
}

/// Keys requests by the connecting socket's IP address.
///
/// Clients behind a shared NAT or proxy collapse into one key.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerAddress;

impl ClientKeyExtractor for PeerAddress {
    fn client_key(&self, _headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        peer_ip(peer)
    }
}

/// Trusts `X-Forwarded-For` then `X-Real-IP` before falling back to the peer
/// address. Only safe behind a proxy that overwrites those headers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardedFor;

impl ClientKeyExtractor for ForwardedFor {
    fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if let Some(value) = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(first) = value.split(',').next() {
                let candidate = first.trim();
                if !candidate.is_empty() {
                    return candidate.to_string();
                }
            }
        }

        if let Some(value) = headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
        {
            let candidate = value.trim();
            if !candidate.is_empty() {
                return candidate.to_string();
            }
        }

        peer_ip(peer)
    }
}

fn peer_ip(peer: Option<SocketAddr>) -> String {
    peer.map(|address| address.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
