/// Middleware for the API server
///
/// Applied to `/v1` in this order (outermost first):
///
/// 1. [`auth`]: JWT or API key authentication; rejected credentials count
///    against a per-IP `failed_auth` limit
/// 2. [`rate_limit`]: distributed rate limiting keyed by the verified API key
///    or, for tokens, the client IP
/// 3. [`context`]: tenant standing, partition resolution and
///    [`RequestContext`] construction
///
/// [`permission`] holds the gate handlers call before business logic, and
/// [`security`] adds response headers to every route.
///
/// [`RequestContext`]: tenantgate_shared::context::RequestContext

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, Request};
use std::net::{IpAddr, SocketAddr};
use tenantgate_shared::context::ClientInfo;

pub mod auth;
pub mod context;
pub mod permission;
pub mod rate_limit;
pub mod security;

/// Header carrying an integration API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Client address as seen through the trusted proxies
///
/// The socket peer is the client unless it is listed in `trusted`. Behind a
/// trusted proxy, `X-Forwarded-For` is walked from the right, skipping
/// trusted hops; the first other address is the client. Hops left of it were
/// supplied by the client and are ignored.
pub fn client_ip<B>(req: &Request<B>, trusted: &[IpAddr]) -> Option<IpAddr> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())?;

    if !trusted.contains(&peer) {
        return Some(peer);
    }

    let client = forwarded_chain(req.headers())
        .into_iter()
        .rev()
        .find(|hop| !trusted.contains(hop));
    Some(client.unwrap_or(peer))
}

/// Rate-limit and audit identifier for the client address
pub fn client_key<B>(req: &Request<B>, trusted: &[IpAddr]) -> String {
    client_ip(req, trusted)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Request metadata recorded in contexts and audit records
pub fn client_info<B>(req: &Request<B>, trusted: &[IpAddr]) -> ClientInfo {
    ClientInfo {
        ip: client_ip(req, trusted).map(|ip| ip.to_string()),
        user_agent: req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        method: Some(req.method().to_string()),
        path: Some(req.uri().path().to_string()),
    }
}

fn forwarded_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|hop| hop.trim().parse().ok())
        .collect()
}
