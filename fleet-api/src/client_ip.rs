//! Client IP resolution behind a reverse proxy. Grounded on
//! `examples/original_source/core/utils.py::get_client_ip`: prefer
//! `X-Forwarded-For`'s first hop, fall back to the transport-level
//! peer address.

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use std::net::SocketAddr;

pub fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    peer.map(|ConnectInfo(addr)| addr.ip().to_string())
}
