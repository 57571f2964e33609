//! Streaming transport: one persistent WebSocket, one binary message per
//! packet
//!
//! WebSocket framing already preserves message boundaries, so packets are
//! sent as-is with no length prefix. A silent peer is detected with Ping
//! frames: if nothing at all arrives within the idle timeout the channel is
//! reported closed.

use super::{ChannelStats, TunnelChannel};
use crate::config::{TransportMode, TransportSecurity, TunnelConfig};
use crate::crypto::TlsConfig;
use crate::error::{IntoTransportError, Result, TransportError};
use crate::protocol::{Credentials, Endpoint, Packet};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time allowed for the close handshake before the socket is dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket tunnel channel
pub struct StreamingChannel {
    endpoint: Endpoint,
    credentials: Credentials,
    security: TransportSecurity,
    connect_timeout: Duration,
    send_timeout: Duration,
    keepalive: Duration,
    idle_timeout: Duration,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    closed: AtomicBool,
    stats: ChannelStats,
}

impl StreamingChannel {
    pub fn new(endpoint: Endpoint, config: &TunnelConfig) -> Self {
        Self {
            endpoint,
            credentials: config.credentials.clone(),
            security: config.security.clone(),
            connect_timeout: config.connect_timeout(),
            send_timeout: config.request_timeout(),
            keepalive: config.keepalive_interval(),
            idle_timeout: config.idle_timeout(),
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            closed: AtomicBool::new(false),
            stats: ChannelStats::default(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn connector(&self) -> Result<Option<Connector>> {
        if !self.endpoint.scheme().is_secure() {
            return Ok(None);
        }
        let tls = TlsConfig::new(&self.security)?;
        Ok(Some(Connector::Rustls(tls.client_config())))
    }

    /// Queue a keepalive Ping. Skipped while the uplink holds the sink, since
    /// a stuck send already has its own deadline.
    async fn ping(&self) {
        let Ok(mut guard) = self.sink.try_lock() else {
            return;
        };
        let Some(sink) = guard.as_mut() else {
            return;
        };
        match tokio::time::timeout(self.send_timeout, sink.send(Message::Ping(Vec::new()))).await {
            Ok(Ok(())) => log::trace!("Ping sent to {}", self.endpoint),
            Ok(Err(e)) => log::debug!("Ping failed: {e}"),
            Err(_) => log::debug!("Ping timed out"),
        }
    }
}

/// Map a handshake failure onto the error taxonomy
fn connect_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response)
            if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
        {
            TransportError::AuthRejected(format!("server answered {}", response.status()))
        }
        WsError::Http(response) => {
            TransportError::ConnectFailed(format!("handshake rejected with {}", response.status()))
        }
        other => TransportError::ConnectFailed(format!("websocket connect: {other}")),
    }
}

fn close_reason(frame: Option<CloseFrame<'_>>) -> String {
    match frame {
        Some(frame) if frame.reason.is_empty() => format!("remote closed ({})", frame.code),
        Some(frame) => format!("remote closed ({}): {}", frame.code, frame.reason),
        None => "remote closed".to_string(),
    }
}

#[async_trait]
impl TunnelChannel for StreamingChannel {
    fn mode(&self) -> TransportMode {
        TransportMode::Streaming
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::closed("channel already closed"));
        }

        let mut request = self
            .endpoint
            .url()
            .into_client_request()
            .or_connect_failed("invalid websocket request")?;
        let auth = HeaderValue::from_str(&self.credentials.header_value())
            .or_connect_failed("credentials are not a valid header value")?;
        request.headers_mut().insert(header::AUTHORIZATION, auth);

        let connector = self.connector()?;
        log::info!("Connecting to {}", self.endpoint);

        let connect = connect_async_tls_with_config(request, None, true, connector);
        let (ws, response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                TransportError::ConnectFailed(format!(
                    "websocket connect timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(connect_error)?;
        log::debug!("WebSocket handshake completed with {}", response.status());

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);

        log::info!("✅ Streaming channel open to {}", self.endpoint);
        Ok(())
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::closed("channel closed"));
        }

        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| TransportError::closed("channel not open"))?;

        let len = packet.len();
        tokio::time::timeout(self.send_timeout, sink.send(Message::Binary(packet.to_vec())))
            .await
            .map_err(|_| {
                TransportError::closed(format!(
                    "websocket send timed out after {:?}",
                    self.send_timeout
                ))
            })?
            .or_channel_closed("websocket send")?;
        self.stats.record_sent(len);
        Ok(())
    }

    async fn receive_loop(&self, sink: mpsc::Sender<Packet>) -> Result<()> {
        let mut stream = self
            .stream
            .lock()
            .await
            .take()
            .ok_or_else(|| TransportError::closed("channel not open or already receiving"))?;

        let mut ping = tokio::time::interval_at(Instant::now() + self.keepalive, self.keepalive);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_frame = Instant::now();

        loop {
            let message = tokio::select! {
                message = stream.next() => match message {
                    Some(message) => message,
                    None => break,
                },
                _ = ping.tick() => {
                    self.ping().await;
                    continue;
                }
                _ = tokio::time::sleep_until(last_frame + self.idle_timeout) => {
                    if self.is_closed() {
                        return Ok(());
                    }
                    log::warn!("No frame from {} for {:?}", self.endpoint, self.idle_timeout);
                    return Err(TransportError::closed("keepalive timed out"));
                }
            };
            last_frame = Instant::now();

            match message {
                Ok(Message::Binary(data)) => {
                    self.stats.record_received(data.len());
                    if sink.send(Bytes::from(data)).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(Message::Close(frame)) => {
                    if self.is_closed() {
                        return Ok(());
                    }
                    let reason = close_reason(frame);
                    log::warn!("{reason}");
                    return Err(TransportError::closed(reason));
                }
                Ok(Message::Text(text)) => {
                    log::debug!("Ignoring {}-byte text message", text.len());
                }
                // Pings are answered by tungstenite itself; pongs only refresh
                // the idle deadline
                Ok(_) => {}
                Err(e) => {
                    if self.is_closed() {
                        return Ok(());
                    }
                    return Err(TransportError::closed(format!("websocket receive: {e}")));
                }
            }
        }

        if self.is_closed() {
            Ok(())
        } else {
            Err(TransportError::closed("websocket stream ended"))
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            let frame = CloseFrame {
                code: CloseCode::Away,
                reason: "going away".into(),
            };
            let goodbye = async {
                sink.send(Message::Close(Some(frame))).await?;
                sink.close().await
            };
            match tokio::time::timeout(CLOSE_TIMEOUT, goodbye).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("Close handshake failed: {e}"),
                Err(_) => log::debug!("Close handshake timed out"),
            }
        }
        self.stream.lock().await.take();

        log::info!(
            "Streaming channel to {} closed: {}",
            self.endpoint,
            self.stats.snapshot()
        );
    }

    fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}
