//! `GET /{instance}/ws`: upgrade handling, client-id cookie and proxy
//! header resolution.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use tracing::debug;
use uib_auth::ClientMeta;
pub use uib_core::CLIENT_ID_COOKIE;
use uib_core::{ClientId, InstanceId};

use super::session::{SessionParams, run_ws_session};
use crate::server::AppState;

/// Lifetime of the client-id cookie (one year).
pub const CLIENT_ID_COOKIE_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// Query parameters sent by the client on connect.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    /// Page the client was loaded from.
    pub page_name: Option<String>,
    /// Browser tab id.
    pub tab_id: Option<String>,
    /// Reconnect attempts so far.
    pub reconnect: Option<u32>,
}

/// Upgrade a request to a client session on `instance`.
///
/// Unknown or malformed instance ids are refused before the upgrade. The
/// response always (re)sets the client-id cookie scoped to the instance.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(raw_instance): Path<String>,
    Query(query): Query<ConnectQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let instance = match InstanceId::parse(&raw_instance) {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    if state.broker.domain(&instance).is_none() {
        debug!(instance = %instance, "upgrade for unknown instance refused");
        return (StatusCode::NOT_FOUND, format!("unknown instance: {instance}")).into_response();
    }

    let meta = client_meta(&headers, addr, state.config.trust_forwarded_proto);
    let client_id = jar
        .get(CLIENT_ID_COOKIE)
        .and_then(|c| ClientId::from_cookie(c.value()))
        .unwrap_or_default();
    let cookie = client_id_cookie(&instance, &client_id, meta.secure);

    let params = SessionParams {
        instance,
        client_id,
        page_name: query.page_name,
        tab_id: query.tab_id,
        reconnect_count: query.reconnect.unwrap_or(0),
        meta,
    };
    let upgrade = ws.on_upgrade(move |socket| run_ws_session(socket, params, state));
    (jar.add(cookie), upgrade).into_response()
}

/// Remote address and channel security for a request.
///
/// Behind a trusted proxy the first `X-Forwarded-For` hop is the remote
/// address and `X-Forwarded-Proto: https` marks the channel secure. The
/// listener itself only speaks plain HTTP, so forwarded headers are ignored
/// unless the deployment opts in.
pub fn client_meta(headers: &HeaderMap, peer: SocketAddr, trust_proxy: bool) -> ClientMeta {
    let first_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };
    if !trust_proxy {
        return ClientMeta {
            remote_address: Some(peer.ip().to_string()),
            secure: false,
        };
    }
    ClientMeta {
        remote_address: first_value("x-forwarded-for").or_else(|| Some(peer.ip().to_string())),
        secure: first_value("x-forwarded-proto").is_some_and(|p| p.eq_ignore_ascii_case("https")),
    }
}

/// Build the client-id cookie, scoped to the instance's mount path.
pub fn client_id_cookie(instance: &InstanceId, client_id: &ClientId, secure: bool) -> Cookie<'static> {
    let mut raw = format!(
        "{CLIENT_ID_COOKIE}={client_id}; Path={}; Max-Age={CLIENT_ID_COOKIE_MAX_AGE_SECS}; HttpOnly; SameSite=Strict",
        instance.mount_path()
    );
    if secure {
        raw.push_str("; Secure");
    }
    Cookie::parse(raw).unwrap_or_else(|_| Cookie::new(CLIENT_ID_COOKIE, client_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum_extra::extract::cookie::SameSite;

    fn peer() -> SocketAddr {
        "10.0.0.5:5555".parse().unwrap()
    }

    #[test]
    fn direct_connection_uses_peer_address() {
        let meta = client_meta(&HeaderMap::new(), peer(), true);
        assert_eq!(meta.remote_address.as_deref(), Some("10.0.0.5"));
        assert!(!meta.secure);
    }

    #[test]
    fn forwarded_headers_are_honoured_when_trusted() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let _ = headers.insert("x-forwarded-proto", HeaderValue::from_static("HTTPS"));
        let meta = client_meta(&headers, peer(), true);
        assert_eq!(meta.remote_address.as_deref(), Some("203.0.113.9"));
        assert!(meta.secure);
    }

    #[test]
    fn forwarded_headers_are_ignored_when_untrusted() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        let _ = headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let meta = client_meta(&headers, peer(), false);
        assert_eq!(meta.remote_address.as_deref(), Some("10.0.0.5"));
        assert!(!meta.secure);
    }

    #[test]
    fn default_config_does_not_trust_spoofed_headers() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        let _ = headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let meta = client_meta(&headers, peer(), crate::ServerConfig::default().trust_forwarded_proto);
        assert!(!meta.secure);
        assert_eq!(meta.remote_address.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn cookie_is_scoped_to_instance() {
        let instance = InstanceId::parse("myapp").unwrap();
        let client_id = ClientId::from("abc123");
        let cookie = client_id_cookie(&instance, &client_id, false);
        assert_eq!(cookie.name(), CLIENT_ID_COOKIE);
        assert_eq!(cookie.value(), "abc123");
        assert_eq!(cookie.path(), Some("/myapp/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.secure(), None);
        assert_eq!(cookie.max_age().map(|d| d.whole_seconds()), Some(31_536_000));
    }

    #[test]
    fn secure_cookie_on_secure_channel() {
        let instance = InstanceId::parse("myapp").unwrap();
        let cookie = client_id_cookie(&instance, &ClientId::from("abc"), true);
        assert_eq!(cookie.secure(), Some(true));
    }

    #[test]
    fn query_uses_camel_case() {
        let query: ConnectQuery =
            serde_json::from_value(serde_json::json!({"pageName": "a.html", "tabId": "t1", "reconnect": 2}))
                .unwrap();
        assert_eq!(query.page_name.as_deref(), Some("a.html"));
        assert_eq!(query.tab_id.as_deref(), Some("t1"));
        assert_eq!(query.reconnect, Some(2));
    }
}
