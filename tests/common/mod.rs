//! Loopback servers shared by the integration tests
//!
//! Both servers echo: whatever a client sends comes back to the same client,
//! so one engine exercises both relay directions.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::{SinkExt, StreamExt};
use lollipop_tunnel::protocol::batch;
use lollipop_tunnel::protocol::constants::BATCH_CONTENT_TYPE;
use lollipop_tunnel::{
    ConnectionState, EngineStatus, ProfileConfig, TransportMode, TunnelConfig, TunnelEngine,
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response as WsResponse};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const USERNAME: &str = "lollipop";
pub const PASSWORD: &str = "x";
pub const AUTH: &str = "Basic bG9sbGlwb3A6eA==";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Engine configuration pointing at a loopback server, tuned for fast tests
pub fn config(addr: SocketAddr, mode: TransportMode) -> TunnelConfig {
    config_with_password(addr, mode, PASSWORD)
}

pub fn config_with_password(addr: SocketAddr, mode: TransportMode, password: &str) -> TunnelConfig {
    let mut profile = ProfileConfig::default();
    profile.server.address = Some(addr.ip().to_string());
    profile.server.port = Some(i64::from(addr.port()));
    profile.server.path = Some("vpn".to_string());
    profile.server.transport = Some(mode);
    profile.server.secure = false;
    profile.auth.username = Some(USERNAME.to_string());
    profile.auth.password = Some(password.to_string());
    profile.polling.interval_ms = 20;
    profile.polling.failure_threshold = 3;
    profile.reconnect.initial_delay_ms = 50;
    profile.reconnect.max_delay_ms = 200;
    profile.reconnect.max_attempts = 3;
    profile.timeouts.connect_secs = 5;
    profile.timeouts.request_secs = 2;
    TunnelConfig::try_from(&profile).expect("valid test profile")
}

/// Wait until the engine reports `state`
pub async fn wait_for_state(engine: &TunnelEngine, state: ConnectionState) -> EngineStatus {
    let mut status = engine.subscribe();
    let reached = tokio::time::timeout(Duration::from_secs(10), status.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}, last {:?}", engine.status()))
        .expect("engine gone");
    reached.clone()
}

/// Loopback WebSocket echo server
pub struct WsServer {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    reject: Arc<AtomicBool>,
    kick: watch::Sender<u64>,
}

impl WsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let reject = Arc::new(AtomicBool::new(false));
        let (kick, _) = watch::channel(0u64);

        let server = Self {
            addr,
            connections: Arc::clone(&connections),
            reject: Arc::clone(&reject),
            kick: kick.clone(),
        };

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_ws(
                    stream,
                    Arc::clone(&connections),
                    reject.load(Ordering::SeqCst),
                    kick.subscribe(),
                ));
            }
        });

        server
    }

    /// Close every open connection from the server side
    pub fn kick_all(&self) {
        self.kick.send_modify(|generation| *generation += 1);
    }

    /// Refuse new handshakes with 503
    pub fn reject_new(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn error_response(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = status;
    response
}

async fn serve_ws(
    stream: TcpStream,
    connections: Arc<AtomicUsize>,
    reject: bool,
    mut kick: watch::Receiver<u64>,
) {
    let callback = move |request: &Request, response: WsResponse| {
        if reject {
            return Err(error_response(StatusCode::SERVICE_UNAVAILABLE));
        }
        match request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            Some(value) if value == AUTH => Ok(response),
            _ => Err(error_response(StatusCode::UNAUTHORIZED)),
        }
    };
    let Ok(ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    connections.fetch_add(1, Ordering::SeqCst);
    let _ = kick.borrow_and_update();

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            _ = kick.changed() => {
                let frame = CloseFrame {
                    code: CloseCode::Away,
                    reason: "kicked".into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    if sink.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Loopback HTTP relay: `POST /vpn/send` queues per `X-Client-Id`,
/// `GET /vpn/recv` pops one packet for the same client, or drains the whole
/// queue as one length-prefixed body in batch mode
#[derive(Clone, Default)]
pub struct RelayState {
    queues: Arc<Mutex<HashMap<String, VecDeque<Bytes>>>>,
    failing: Arc<AtomicBool>,
    recv_failing: Arc<AtomicBool>,
    batch: Arc<AtomicBool>,
    pub sends: Arc<AtomicUsize>,
    pub polls: Arc<AtomicUsize>,
}

pub struct HttpRelay {
    pub addr: SocketAddr,
    pub state: RelayState,
}

impl HttpRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = RelayState::default();

        let app = Router::new()
            .route("/vpn/send", post(relay_send))
            .route("/vpn/recv", get(relay_recv))
            .with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    /// Answer every request with 503 while set
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Answer only `/recv` with 500 while set; `/send` keeps working
    pub fn set_recv_failing(&self, failing: bool) {
        self.state.recv_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_batch(&self, batch: bool) {
        self.state.batch.store(batch, Ordering::SeqCst);
    }

    /// Queue a packet for `client` as if the far end had sent it
    pub fn push(&self, client: &str, packet: &'static [u8]) {
        self.state
            .queues
            .lock()
            .unwrap()
            .entry(client.to_string())
            .or_default()
            .push_back(Bytes::from_static(packet));
    }
}

fn authorize(state: &RelayState, headers: &HeaderMap) -> Result<String, StatusCode> {
    if state.failing.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if auth != Some(AUTH) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(headers
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default")
        .to_string())
}

async fn relay_send(State(state): State<RelayState>, headers: HeaderMap, body: Bytes) -> Response {
    let client = match authorize(&state, &headers) {
        Ok(client) => client,
        Err(status) => return status.into_response(),
    };
    state.sends.fetch_add(1, Ordering::SeqCst);
    let queued = body.len();
    if !body.is_empty() {
        state
            .queues
            .lock()
            .unwrap()
            .entry(client)
            .or_default()
            .push_back(body);
    }
    (
        [(header::CONTENT_TYPE, "application/json")],
        format!("{{\"queued\": {queued}}}"),
    )
        .into_response()
}

async fn relay_recv(State(state): State<RelayState>, headers: HeaderMap) -> Response {
    let client = match authorize(&state, &headers) {
        Ok(client) => client,
        Err(status) => return status.into_response(),
    };
    state.polls.fetch_add(1, Ordering::SeqCst);
    if state.recv_failing.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let mut queues = state.queues.lock().unwrap();
    let queue = queues.entry(client).or_default();
    if state.batch.load(Ordering::SeqCst) {
        let packets: Vec<Bytes> = queue.drain(..).collect();
        let body = batch::encode_batch(&packets).unwrap();
        return ([(header::CONTENT_TYPE, BATCH_CONTENT_TYPE)], body).into_response();
    }
    let payload = queue.pop_front().unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        payload,
    )
        .into_response()
}
