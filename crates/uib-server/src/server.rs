//! `GatewayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uib_broker::Broker;

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Message broker holding every mounted instance.
    pub broker: Arc<Broker>,
    /// Listener configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The gateway server.
pub struct GatewayServer {
    config: Arc<ServerConfig>,
    broker: Arc<Broker>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics_handle: Option<PrometheusHandle>,
    start_time: Instant,
}

impl GatewayServer {
    /// Create a new server around an existing broker.
    pub fn new(config: ServerConfig, broker: Arc<Broker>) -> Self {
        Self {
            config: Arc::new(config),
            broker,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics_handle: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broker: Arc::clone(&self.broker),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/{instance}/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();
        info!(%addr, instances = ?self.broker.instances(), "gateway listening");

        let handle = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
            if let Err(e) = result {
                warn!(error = %e, "server terminated with error");
            }
        });
        Ok((addr, handle))
    }

    /// Get the broker.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.broker.stats()))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(crate::metrics::render)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use uib_broker::{ChannelSink, InstanceConfig, InstanceHooks};
    use uib_core::InstanceId;

    fn make_server() -> GatewayServer {
        let broker = Arc::new(Broker::new());
        let (sink, _rx) = ChannelSink::new();
        let _ = broker
            .create_domain(
                InstanceConfig::new(InstanceId::parse("myapp").unwrap()),
                InstanceHooks::new(Arc::new(sink)),
            )
            .unwrap();
        GatewayServer::new(ServerConfig::default(), broker)
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        (status, body.to_vec())
    }

    #[test]
    fn accessors() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.broker().instances().len(), 1);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_lists_instances() {
        let server = make_server();
        let (status, body) = get_body(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["instances"][0]["instance"], "myapp");
    }

    #[tokio::test]
    async fn metrics_endpoint_without_recorder_is_empty() {
        let server = make_server();
        let (status, body) = get_body(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let (status, _) = get_body(server.router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
