use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::api::error::{apply_rate_limit_headers, ApiError};
use crate::api::AppState;
use crate::ratelimit::{RateLimitDecision, RateLimitKey, RateLimiter};

/// Caller address after proxy headers are taken into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> IpAddr {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };
    forwarded
        .or_else(real_ip)
        .or(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn resolve_client_ip(mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(req.headers(), peer);
    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

fn request_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ClientIp>()
        .map(|ClientIp(ip)| *ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Count one request against `limiter`, failing with 429 once the window is full.
pub fn enforce(limiter: &RateLimiter, key: &RateLimitKey) -> Result<RateLimitDecision, ApiError> {
    let decision = limiter.check(key);
    if decision.allowed {
        return Ok(decision);
    }
    Err(ApiError::RateLimited {
        decision,
        retry_after: decision.retry_after(limiter.now()),
    })
}

async fn limit_by_ip(limiter: &RateLimiter, req: Request, next: Next) -> Response {
    let key = RateLimitKey::ip(request_ip(&req));
    match enforce(limiter, &key) {
        Ok(decision) => {
            let mut response = next.run(req).await;
            apply_rate_limit_headers(response.headers_mut(), &decision);
            response
        }
        Err(err) => err.into_response(),
    }
}

pub async fn general_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    limit_by_ip(&state.limits.general, req, next).await
}

pub async fn admin_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    limit_by_ip(&state.limits.admin, req, next).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

pub async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorized = bearer_token(req.headers())
        .map(|token| {
            // Fixed-length digests, not the raw secret.
            Sha256::digest(token.as_bytes()) == Sha256::digest(state.admin_secret.expose().as_bytes())
        })
        .unwrap_or(false);
    if !authorized {
        warn!(ip = %request_ip(&req), path = %req.uri().path(), "rejected admin request");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}
