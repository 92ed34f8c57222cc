//! The client connection manager against a real server.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use uib_broker::{
    BackendMessage, Broker, ChannelSink, InstanceConfig, InstanceHooks, OutboundEnvelope,
};
use uib_client::{ClientConfig, ClientEvent, ConnectionHandle, ConnectionManager, ReadyState};
use uib_core::{ConnectionId, InstanceId};
use uib_server::{GatewayServer, ServerConfig};

const TIMEOUT: Duration = Duration::from_secs(10);

fn myapp() -> InstanceId {
    InstanceId::parse("myapp").unwrap()
}

struct Setup {
    broker: Arc<Broker>,
    sink: ChannelSink,
    backend: UnboundedReceiver<(InstanceId, BackendMessage)>,
    handle: ConnectionHandle,
    events: UnboundedReceiver<ClientEvent>,
    _server: GatewayServer,
}

impl Setup {
    async fn start() -> Self {
        let broker = Arc::new(Broker::new());
        let (sink, backend) = ChannelSink::new();
        let _ = broker
            .create_domain(InstanceConfig::new(myapp()), InstanceHooks::new(Arc::new(sink.clone())))
            .unwrap();
        let server = GatewayServer::new(ServerConfig::default(), Arc::clone(&broker));
        let (addr, _handle) = server.listen().await.unwrap();

        let config = ClientConfig {
            page_name: Some("index.html".into()),
            ..ClientConfig::default()
        };
        let (handle, events) = ConnectionManager::websocket(format!("ws://{addr}"), myapp(), config);
        Self {
            broker,
            sink,
            backend,
            handle,
            events,
            _server: server,
        }
    }

    /// Next event matching `pick`, skipping the rest.
    async fn event<T>(&mut self, mut pick: impl FnMut(ClientEvent) -> Option<T>) -> T {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                let event = self.events.recv().await.expect("manager running");
                if let Some(found) = pick(event) {
                    return found;
                }
            }
        })
        .await
        .expect("timed out waiting for client event")
    }

    async fn connected(&mut self) -> ConnectionId {
        self.event(|e| match e {
            ClientEvent::Connected { connection_id, .. } => Some(connection_id),
            _ => None,
        })
        .await
    }

    async fn backend_data(&mut self) -> serde_json::Value {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                if let Some((_, BackendMessage::Data(value))) = self.backend.recv().await {
                    return value;
                }
            }
        })
        .await
        .expect("timed out waiting for backend")
    }
}

#[tokio::test]
async fn manager_round_trips_through_the_broker() {
    let mut setup = Setup::start().await;
    setup.handle.connect().unwrap();
    let connection_id = setup.connected().await;

    let kind = setup
        .event(|e| match e {
            ClientEvent::Control(c) => Some(c.kind()),
            _ => None,
        })
        .await;
    assert_eq!(kind, "client connect");

    setup.handle.send(json!({"topic": "t", "payload": 1})).unwrap();
    let data = setup.backend_data().await;
    assert_eq!(data["payload"], 1);
    assert_eq!(data["_socketId"], connection_id.as_str());

    let _ = setup
        .broker
        .send_to_instance(&myapp(), &OutboundEnvelope::broadcast(json!({"payload": "hi"})));
    let payload = setup
        .event(|e| match e {
            ClientEvent::Message { payload } => Some(payload),
            _ => None,
        })
        .await;
    assert_eq!(payload["payload"], "hi");
}

#[tokio::test]
async fn acknowledged_send_resolves() {
    let mut setup = Setup::start().await;
    setup.handle.connect().unwrap();
    let _ = setup.connected().await;
    setup
        .handle
        .send_with_ack(json!({"payload": 2}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(setup.backend_data().await["payload"], 2);
}

#[tokio::test]
async fn client_id_survives_instance_restart() {
    let mut setup = Setup::start().await;
    setup.handle.connect().unwrap();
    let first = setup.connected().await;
    let client_id = setup.handle.status().client_id.unwrap();

    assert!(setup.broker.destroy_domain(&myapp()));
    let _ = setup
        .broker
        .create_domain(
            InstanceConfig::new(myapp()),
            InstanceHooks::new(Arc::new(setup.sink.clone())),
        )
        .unwrap();

    let reason = setup
        .event(|e| match e {
            ClientEvent::Disconnected { reason } => Some(reason),
            _ => None,
        })
        .await;
    assert_eq!(reason, "instance shutdown");

    let second = setup.connected().await;
    assert_ne!(first, second);
    let status = setup.handle.status();
    assert_eq!(status.client_id, Some(client_id));
    assert_eq!(status.attempts, 0);
}

#[tokio::test]
async fn close_reaches_the_server() {
    let mut setup = Setup::start().await;
    setup.handle.connect().unwrap();
    let _ = setup.connected().await;
    assert_eq!(setup.broker.stats()[0].clients, 1);

    setup.handle.close().unwrap();
    setup
        .event(|e| matches!(e, ClientEvent::Closed).then_some(()))
        .await;
    assert_eq!(setup.handle.ready_state(), ReadyState::Closed);

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while setup.broker.stats()[0].clients > 0 {
        assert!(tokio::time::Instant::now() < deadline, "session not removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn unknown_instance_gives_up_after_max_attempts() {
    let broker = Arc::new(Broker::new());
    let server = GatewayServer::new(ServerConfig::default(), Arc::clone(&broker));
    let (addr, _handle) = server.listen().await.unwrap();
    let config = ClientConfig {
        max_reconnect_attempts: Some(1),
        ..ClientConfig::default()
    };
    let (handle, mut events) = ConnectionManager::websocket(format!("ws://{addr}"), myapp(), config);
    handle.connect().unwrap();

    assert_matches!(
        tokio::time::timeout(TIMEOUT, events.recv()).await.unwrap(),
        Some(ClientEvent::TransportError(_))
    );
    assert_matches!(
        tokio::time::timeout(TIMEOUT, events.recv()).await.unwrap(),
        Some(ClientEvent::Reconnecting { attempt: 1, .. })
    );
    assert_matches!(
        tokio::time::timeout(TIMEOUT, events.recv()).await.unwrap(),
        Some(ClientEvent::TransportError(_))
    );
    assert_matches!(
        tokio::time::timeout(TIMEOUT, events.recv()).await.unwrap(),
        Some(ClientEvent::ReconnectFailed)
    );
}
