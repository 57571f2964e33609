//! Polling transport: independent HTTPS exchanges
//!
//! Downstream is a `GET {endpoint}/recv` on a fixed interval; upstream is one
//! `POST {endpoint}/send` per packet. Individual failures are tolerated up to
//! `failure_threshold` consecutive ones. Each direction keeps its own count,
//! reset only by a success in that direction, so a healthy uplink cannot
//! mask a dead downlink.

use super::{ChannelStats, TunnelChannel};
use crate::config::{TransportMode, TransportSecurity, TunnelConfig};
use crate::crypto::TlsConfig;
use crate::error::{IntoTransportError, Result, TransportError};
use crate::protocol::batch::{self, BodyFormat};
use crate::protocol::constants::{CLIENT_ID_HEADER, OCTET_STREAM, RECV_SUFFIX, SEND_SUFFIX};
use crate::protocol::{Credentials, Endpoint, Packet};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU32, Ordering};
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// HTTPS polling tunnel channel
pub struct PollingChannel {
    endpoint: Endpoint,
    recv_url: String,
    send_url: String,
    credentials: Credentials,
    security: TransportSecurity,
    interval: Duration,
    connect_timeout: Duration,
    request_timeout: Duration,
    failure_threshold: u32,
    burst_limit: u32,
    client: RwLock<Option<Client>>,
    poll_failures: AtomicU32,
    send_failures: AtomicU32,
    cancel: CancellationToken,
    stats: ChannelStats,
}

impl PollingChannel {
    pub fn new(endpoint: Endpoint, config: &TunnelConfig) -> Self {
        Self {
            recv_url: endpoint.resource(RECV_SUFFIX),
            send_url: endpoint.resource(SEND_SUFFIX),
            endpoint,
            credentials: config.credentials.clone(),
            security: config.security.clone(),
            interval: config.poll_interval(),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            failure_threshold: config.polling.failure_threshold.max(1),
            burst_limit: config.polling.burst_limit,
            client: RwLock::new(None),
            poll_failures: AtomicU32::new(0),
            send_failures: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            stats: ChannelStats::default(),
        }
    }

    fn client(&self) -> Result<Client> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::closed("channel closed"));
        }
        self.client
            .read()
            .map_err(|_| TransportError::closed("client lock poisoned"))?
            .clone()
            .ok_or_else(|| TransportError::closed("channel not open"))
    }

    fn build_client(&self) -> Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&self.credentials.header_value())
                .or_connect_failed("credentials are not a valid header value")?,
        );
        headers.insert(
            HeaderName::from_static("x-client-id"),
            HeaderValue::from_str(self.credentials.client_id())
                .or_connect_failed(&format!("username is not a valid {CLIENT_ID_HEADER} value"))?,
        );

        let mut builder = Client::builder()
            .default_headers(headers)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);
        if self.endpoint.scheme().is_secure() {
            let tls = TlsConfig::new(&self.security)?;
            builder = builder.use_preconfigured_tls(tls.http_client_config());
        }

        builder.build().or_connect_failed("failed to build HTTP client")
    }

    /// One `/recv` exchange
    async fn poll_once(&self, client: &Client) -> Result<Vec<Packet>> {
        let response = client
            .get(&self.recv_url)
            .send()
            .await
            .or_channel_closed("poll request")?;
        check_status(response.status())?;

        let format = BodyFormat::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.bytes().await.or_channel_closed("poll body")?;
        batch::decode(body, format)
    }

    fn counter(&self, direction: Direction) -> &AtomicU32 {
        match direction {
            Direction::Poll => &self.poll_failures,
            Direction::Send => &self.send_failures,
        }
    }

    /// Count a failed exchange; escalates once the threshold is reached
    fn record_failure(&self, direction: Direction, error: &TransportError) -> Result<()> {
        let failures = self.counter(direction).fetch_add(1, Ordering::AcqRel) + 1;
        log::warn!(
            "{direction} failed ({failures}/{} consecutive): {error}",
            self.failure_threshold
        );
        if failures >= self.failure_threshold {
            return Err(TransportError::closed(format!(
                "{failures} consecutive failed {direction} exchanges, last: {error}"
            )));
        }
        Ok(())
    }

    fn record_success(&self, direction: Direction) {
        self.counter(direction).store(0, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Poll,
    Send,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Poll => f.write_str("poll"),
            Direction::Send => f.write_str("send"),
        }
    }
}

fn check_status(status: StatusCode) -> Result<()> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::AuthRejected(
            format!("server answered {status}"),
        )),
        s if s.is_success() => Ok(()),
        s => Err(TransportError::closed(format!("server answered {s}"))),
    }
}

#[async_trait]
impl TunnelChannel for PollingChannel {
    fn mode(&self) -> TransportMode {
        TransportMode::Polling
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Only prepares the HTTP client; no request is made.
    async fn open(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::closed("channel already closed"));
        }

        let client = self.build_client()?;
        *self
            .client
            .write()
            .map_err(|_| TransportError::closed("client lock poisoned"))? = Some(client);

        log::info!(
            "✅ Polling channel ready for {} (interval {:?})",
            self.endpoint,
            self.interval
        );
        Ok(())
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        let client = self.client()?;
        let len = packet.len();

        let request = client
            .post(&self.send_url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(packet)
            .send();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransportError::closed("channel closed")),
            response = request => response
                .or_channel_closed("send request")
                .and_then(|r| check_status(r.status())),
        };

        match outcome {
            Ok(()) => {
                self.record_success(Direction::Send);
                self.stats.record_sent(len);
                Ok(())
            }
            Err(e) => {
                // Below the threshold the packet is dropped; IP tolerates loss
                self.record_failure(Direction::Send, &e)
            }
        }
    }

    async fn receive_loop(&self, sink: mpsc::Sender<Packet>) -> Result<()> {
        let client = self.client()?;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            // Keep polling while the server has traffic queued, at most
            // `burst_limit` polls per tick
            let mut burst = 0;
            loop {
                let polled = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(()),
                    polled = self.poll_once(&client) => polled,
                };

                let packets = match polled {
                    Ok(packets) => {
                        self.record_success(Direction::Poll);
                        packets
                    }
                    Err(e) => {
                        self.record_failure(Direction::Poll, &e)?;
                        break;
                    }
                };
                if packets.is_empty() {
                    break;
                }

                log::trace!("Poll returned {} packet(s)", packets.len());
                for packet in packets {
                    if self.cancel.is_cancelled() {
                        return Ok(());
                    }
                    self.stats.record_received(packet.len());
                    if sink.send(packet).await.is_err() {
                        return Ok(());
                    }
                }

                burst += 1;
                if burst >= self.burst_limit {
                    break;
                }
            }
        }
    }

    async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Ok(mut client) = self.client.write() {
            client.take();
        }
        log::info!(
            "Polling channel to {} closed: {}",
            self.endpoint,
            self.stats.snapshot()
        );
    }

    fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}
