//! # Test Harness
//!
//! Starts a real hub on `127.0.0.1:0` (plain HTTP) and provides clients for
//! its REST, SSE and WebSocket surfaces.

use futures::{SinkExt, Stream, StreamExt};
use hub_digitwin::{DigitwinConfig, DigitwinStore};
use hub_gateway::domain::config::ClientSeed;
use hub_gateway::{Authenticator, HubConfig, HubError, HubService, JwtAuthenticator, Role};
use hub_types::WsMessage;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Default wait for a single push frame.
pub const PUSH_WAIT: Duration = Duration::from_secs(3);

/// A running hub plus an HTTP client.
pub struct TestHub {
    base: String,
    addr: std::net::SocketAddr,
    http: reqwest::Client,
    authenticator: Arc<JwtAuthenticator>,
    stop: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<Result<(), HubError>>>,
}

/// Clients seeded into every test hub: `(id, role, password)`.
pub const CLIENTS: &[(&str, Role, &str)] = &[
    ("u1", Role::Operator, "p"),
    ("viewer", Role::Viewer, "pv"),
    ("A", Role::Agent, "pa"),
    ("B", Role::Agent, "pb"),
];

impl TestHub {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with a customised configuration.
    pub async fn start_with(customize: impl FnOnce(&mut HubConfig)) -> Self {
        hub_telemetry::init_test_logging();

        let mut config = HubConfig::default();
        config.timeouts.dispatch = Duration::from_millis(200);
        for (client_id, role, password) in CLIENTS {
            config.authn.clients.push(ClientSeed {
                client_id: client_id.to_string(),
                display_name: None,
                role: *role,
                password: password.to_string(),
            });
        }
        customize(&mut config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        config.server.public_url = Some(format!("http://{addr}"));

        let hub = HubService::new(config, DigitwinStore::in_memory(DigitwinConfig::default()))
            .unwrap();
        let authenticator = Arc::clone(hub.authenticator());
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(hub.serve(listener, async move {
            let _ = stopped.await;
        }));

        Self {
            base: format!("http://{addr}"),
            addr,
            http: reqwest::Client::new(),
            authenticator,
            stop: Some(stop),
            server: Some(server),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn agent_token(&self, client_id: &str) -> String {
        self.authenticator.create_agent_token(client_id).unwrap()
    }

    /// Log in and return the token.
    pub async fn login(&self, client_id: &str, password: &str) -> String {
        let response = self
            .http
            .post(self.url("/authn/login"))
            .json(&serde_json::json!({"clientID": client_id, "password": password}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.http
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    pub async fn post(&self, path: &str, token: &str, body: &Value) -> reqwest::Response {
        self.http
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    /// POST without a body.
    pub async fn post_empty(&self, path: &str, token: &str) -> reqwest::Response {
        self.http
            .post(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    /// Open `/sse` and wait for the connect ping.
    pub async fn sse(&self, token: &str) -> SseClient {
        let response = self.get("/sse", token).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let mut client = SseClient::new(response);
        let ping = client.next_within(PUSH_WAIT).await.expect("connect ping");
        assert_eq!(ping.event, "ping");
        client
    }

    /// Open `/ws` and wait for the connect ping.
    pub async fn ws(&self, token: &str) -> WsClient {
        let mut request = format!("ws://{}/ws", self.addr).into_client_request().unwrap();
        request.headers_mut().insert(
            "authorization",
            HeaderValue::from_str(&format!("bearer {token}")).unwrap(),
        );
        let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        let mut client = WsClient { socket };
        let ping = client.next_within(PUSH_WAIT).await.expect("connect ping");
        assert_eq!(ping.message_type, hub_types::WsMessageType::Ping);
        client
    }

    /// Publish the test thermometer `T1` as `agent`.
    pub async fn publish_thermometer(&self, agent_token: &str) {
        let response = self
            .post("/agent/tdd/T1", agent_token, &thermometer("Thermometer"))
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    }

    /// Signal shutdown and wait for the server to return.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(server) = self.server.take() {
            let result = tokio::time::timeout(Duration::from_secs(10), server)
                .await
                .expect("server stops");
            assert!(result.unwrap().is_ok());
        }
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Thing `T1` with a `temperature` event, an `x` property and a `toggle`
/// action.
pub fn thermometer(title: &str) -> Value {
    serde_json::json!({
        "id": "T1",
        "title": title,
        "events": {"temperature": {"data": {"type": "number"}}},
        "properties": {"x": {"type": "integer"}},
        "actions": {"toggle": {"input": {"type": "boolean"}}}
    })
}

/// One parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub id: String,
    pub data: String,
}

impl SseEvent {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).unwrap()
    }

    /// Last segment of the structured id.
    pub fn request_id(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or_default()
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

/// Incremental `text/event-stream` reader over a response body.
pub struct SseClient {
    body: ByteStream,
    buffer: String,
}

impl SseClient {
    fn new(response: reqwest::Response) -> Self {
        Self {
            body: Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()))),
            buffer: String::new(),
        }
    }

    /// Next event, or `None` when the stream ends or `wait` passes first.
    pub async fn next_within(&mut self, wait: Duration) -> Option<SseEvent> {
        tokio::time::timeout(wait, self.next_event()).await.ok().flatten()
    }

    async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(event) = self.take_buffered() {
                return Some(event);
            }
            let chunk = self.body.next().await?.ok()?;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    fn take_buffered(&mut self) -> Option<SseEvent> {
        loop {
            let end = self.buffer.find("\n\n")?;
            let block: String = self.buffer.drain(..end + 2).collect();
            let mut event = SseEvent::default();
            let mut data = Vec::new();
            for line in block.lines() {
                // Comment lines are keep-alives.
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let (field, value) = line.split_once(':').unwrap_or((line, ""));
                let value = value.strip_prefix(' ').unwrap_or(value);
                match field {
                    "event" => event.event = value.to_string(),
                    "id" => event.id = value.to_string(),
                    "data" => data.push(value),
                    _ => {}
                }
            }
            if event.event.is_empty() && data.is_empty() {
                continue;
            }
            event.data = data.join("\n");
            return Some(event);
        }
    }
}

/// WebSocket client speaking the hub's JSON frames.
pub struct WsClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, frame: &WsMessage) {
        let text = serde_json::to_string(frame).unwrap();
        self.socket.send(Message::Text(text)).await.unwrap();
    }

    /// Next JSON frame, skipping control frames.
    pub async fn next_within(&mut self, wait: Duration) -> Option<WsMessage> {
        let next = async {
            while let Some(message) = self.socket.next().await {
                match message.ok()? {
                    Message::Text(text) => return serde_json::from_str(&text).ok(),
                    Message::Close(_) => return None,
                    _ => continue,
                }
            }
            None
        };
        tokio::time::timeout(wait, next).await.ok().flatten()
    }
}
