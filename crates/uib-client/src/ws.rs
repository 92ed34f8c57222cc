//! WebSocket connector on `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tracing::debug;
use uib_core::{CLIENT_ID_COOKIE, Frame, InstanceId, TransportError};

use crate::transport::{ConnectParams, Connector, Link, TransportKind};

/// Query components keep the RFC 3986 unreserved set.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Connects to `GET {base}/{instance}/ws`.
#[derive(Clone, Debug)]
pub struct WsConnector {
    base_url: String,
    instance: InstanceId,
}

impl WsConnector {
    /// `base_url` is the server origin, e.g. `ws://127.0.0.1:3000`.
    pub fn new(base_url: impl Into<String>, instance: InstanceId) -> Self {
        Self {
            base_url: base_url.into(),
            instance,
        }
    }

    /// Full endpoint URL for one attempt.
    pub fn endpoint(&self, params: &ConnectParams) -> String {
        let mut url = format!(
            "{}/{}/ws?reconnect={}",
            self.base_url.trim_end_matches('/'),
            self.instance,
            params.reconnect
        );
        if let Some(page) = &params.page_name {
            url.push_str("&pageName=");
            url.extend(utf8_percent_encode(page, QUERY_COMPONENT));
        }
        if let Some(tab) = &params.tab_id {
            url.push_str("&tabId=");
            url.extend(utf8_percent_encode(tab, QUERY_COMPONENT));
        }
        url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, kind: TransportKind, params: &ConnectParams) -> Result<Link, TransportError> {
        if kind != TransportKind::WebSocket {
            return Err(TransportError::new(format!("{kind} transport is not supported")));
        }
        let url = self.endpoint(params);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::new(e.to_string()).with_context(url.clone()))?;
        if let Some(client_id) = &params.client_id {
            let cookie = HeaderValue::from_str(&format!("{CLIENT_ID_COOKIE}={client_id}"))
                .map_err(|e| TransportError::new(e.to_string()))?;
            let _ = request.headers_mut().insert(COOKIE, cookie);
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::new(e.to_string()).with_context(url.clone()))?;
        debug!(%url, "websocket connected");

        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(|e| TransportError::new(e.to_string()))
            .with(|frame: Frame| {
                future::ready(
                    frame
                        .to_text()
                        .map(Message::text)
                        .map_err(|e| TransportError::new(e.to_string())),
                )
            });
        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => match Frame::parse(text.as_str()) {
                    Ok(frame) => Some(Ok(frame)),
                    Err(e) => {
                        debug!(error = %e, "unparseable frame ignored");
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::new(e.to_string()))),
            })
        });
        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_includes_query() {
        let connector = WsConnector::new("ws://127.0.0.1:3000/", InstanceId::parse("myapp").unwrap());
        let params = ConnectParams {
            page_name: Some("index.html".into()),
            tab_id: Some("t 1".into()),
            reconnect: 2,
            ..ConnectParams::default()
        };
        assert_eq!(
            connector.endpoint(&params),
            "ws://127.0.0.1:3000/myapp/ws?reconnect=2&pageName=index.html&tabId=t%201"
        );
    }

    #[test]
    fn query_components_keep_unreserved() {
        let connector = WsConnector::new("ws://h", InstanceId::parse("myapp").unwrap());
        let params = ConnectParams {
            page_name: Some("a-b_c.d~e".into()),
            tab_id: Some("a/b?c&d=é".into()),
            ..ConnectParams::default()
        };
        assert_eq!(
            connector.endpoint(&params),
            "ws://h/myapp/ws?reconnect=0&pageName=a-b_c.d~e&tabId=a%2Fb%3Fc%26d%3D%C3%A9"
        );
    }

    #[tokio::test]
    async fn polling_is_rejected() {
        let connector = WsConnector::new("ws://127.0.0.1:1", InstanceId::parse("myapp").unwrap());
        let err = connector
            .connect(TransportKind::Polling, &ConnectParams::default())
            .await
            .unwrap_err();
        assert!(err.reason.contains("polling"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let connector = WsConnector::new("ws://127.0.0.1:1", InstanceId::parse("myapp").unwrap());
        let err = connector
            .connect(TransportKind::WebSocket, &ConnectParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.context.as_deref(), Some("ws://127.0.0.1:1/myapp/ws?reconnect=0"));
    }
}
