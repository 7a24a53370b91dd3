use std::net::SocketAddr;

use axum::{
    RequestPartsExt,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, StatusCode, request::Parts},
};
use axum_extra::{TypedHeader, headers::UserAgent};

use crate::types::{ConnectionInfo, RouteConfig};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

impl<S> FromRequestParts<S> for ConnectionInfo
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .extract::<Option<TypedHeader<UserAgent>>>()
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid user agent header"))?
            .map(|ua| ua.to_string());

        let trust_forwarded = parts
            .extensions
            .get::<RouteConfig>()
            .is_some_and(|config| config.trust_forwarded_headers);

        let forwarded = if trust_forwarded {
            forwarded_address(&parts.headers)
        } else {
            None
        };

        let address = match forwarded {
            Some(address) => Some(address),
            None => parts
                .extract::<ConnectInfo<SocketAddr>>()
                .await
                .ok()
                .map(|ConnectInfo(addr)| addr.ip().to_string()),
        };

        Ok(ConnectionInfo {
            address,
            user_agent,
        })
    }
}

/// Client address reported by a reverse proxy: the first `X-Forwarded-For`
/// hop, then `X-Real-IP`.
fn forwarded_address(headers: &HeaderMap) -> Option<String> {
    let first_hop = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    let real_ip = || {
        headers
            .get(X_REAL_IP)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    };

    first_hop.or_else(real_ip).map(str::to_string)
}
