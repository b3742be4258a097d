use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use crate::{
    adapters::http::{app_state::AppState, auth::access_token},
    app_error::AppError,
    application::jwt,
};

/// Per-IP and per-account admission for the `/api` routes.
pub async fn rate_limit_middleware(
    State(app_state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    cookies: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(request.headers(), peer, app_state.config.trust_proxy);

    // A token that fails verification only counts against the IP; the handler rejects it.
    let account = access_token(request.headers(), &cookies)
        .and_then(|token| jwt::verify(&token, &app_state.config.jwt_secret).ok())
        .map(|claims| claims.sub);

    tracing::debug!(%peer, %ip, ?account, "Admission check");

    app_state.rate_limiter.check(&ip, account.as_deref()).await?;

    request.extensions_mut().insert(cookies);
    Ok(next.run(request).await)
}

/// Forwarding headers are honored only behind a configured reverse proxy.
fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_proxy: bool) -> String {
    trust_proxy
        .then(|| forwarded_ip(headers))
        .flatten()
        .unwrap_or_else(|| peer.ip().to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };

    header("x-forwarded-for")
        .and_then(|chain| chain.split(',').next().map(|hop| hop.trim().to_owned()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            header("x-real-ip")
                .map(|ip| ip.trim().to_owned())
                .filter(|ip| !ip.is_empty())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    fn peer() -> SocketAddr {
        "192.0.2.10:5000".parse().unwrap()
    }

    #[test]
    fn forwarded_for_uses_first_hop() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(client_ip(&h, peer(), true), "203.0.113.7");
    }

    #[test]
    fn real_ip_is_the_fallback() {
        let h = headers(&[("x-real-ip", " 198.51.100.2 ")]);
        assert_eq!(client_ip(&h, peer(), true), "198.51.100.2");
        assert_eq!(client_ip(&HeaderMap::new(), peer(), true), "192.0.2.10");
    }

    #[test]
    fn forwarding_headers_ignored_without_trusted_proxy() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7")]);
        assert_eq!(client_ip(&h, peer(), false), "192.0.2.10");
    }
}
