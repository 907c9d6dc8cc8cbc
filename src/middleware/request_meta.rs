use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, Extensions, HeaderMap},
};

use crate::AppState;

/// Client facts every pipeline stage may need, read once per request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMeta {
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub authorization: Option<String>,
}

impl RequestMeta {
    pub const UNKNOWN_CLIENT: &'static str = "unknown";

    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_proxies: &[IpAddr]) -> Self {
        Self {
            client_ip: client_ip(headers, peer, trusted_proxies),
            user_agent: header_string(headers, header::USER_AGENT.as_str()),
            authorization: header_string(headers, header::AUTHORIZATION.as_str()),
        }
    }

    /// Peer address comes from the `ConnectInfo` extension, when the server recorded one
    pub fn read(headers: &HeaderMap, extensions: &Extensions, trusted_proxies: &[IpAddr]) -> Self {
        let peer = extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::from_headers(headers, peer, trusted_proxies)
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// The socket peer. Only a trusted proxy may speak for someone else: then
/// the nearest untrusted `X-Forwarded-For` hop wins, then `X-Real-IP`.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return RequestMeta::UNKNOWN_CLIENT.to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    forwarded_client(headers, trusted_proxies)
        .or_else(|| header_string(headers, "x-real-ip").and_then(|v| v.trim().parse().ok()))
        .unwrap_or(peer)
        .to_string()
}

/// Walks the chain right to left, skipping our own proxies. A hop that is
/// not an address ends the walk.
fn forwarded_client(headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let chain = header_string(headers, "x-forwarded-for")?;
    for hop in chain.rsplit(',') {
        let ip: IpAddr = hop.trim().parse().ok()?;
        if !trusted_proxies.contains(&ip) {
            return Some(ip);
        }
    }
    None
}

#[async_trait]
impl FromRequestParts<AppState> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self::read(
            &parts.headers,
            &parts.extensions,
            &state.config.security.trusted_proxies,
        ))
    }
}
