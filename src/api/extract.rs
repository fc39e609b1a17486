use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::api::AppState;
use crate::api::error::ApiError;
use crate::auth::{Principal, require_admin};
use crate::engine::EngineError;

/// A verified admin bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth(pub Principal);

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let principal = state.gate.verify_header(header)?;
        require_admin(&principal)?;
        Ok(AdminAuth(principal))
    }
}

/// A caller the rate limiter admitted. Must come before any body extractor
/// so refused requests are never parsed. Needs the router served with
/// `into_make_service_with_connect_info::<SocketAddr>()`; without a peer
/// address the request fails rather than sharing one limiter bucket.
#[derive(Debug, Clone, Copy)]
pub struct Admitted(pub IpAddr);

impl FromRequestParts<AppState> for Admitted {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .ok_or_else(|| EngineError::Internal("no peer address on request".into()))?;
        state.limiter.check(ip)?;
        Ok(Admitted(ip))
    }
}
