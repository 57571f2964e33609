//! Queue-backed virtual interface
//!
//! Outbound packets are pushed in through an [`InterfaceHandle`]; packets the
//! engine delivers come back out of the same handle. Used by the C boundary
//! for hosts that push packets in, and by tests.

use super::{InterfaceSettings, VirtualInterface};
use crate::protocol::Packet;
use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Most packets handed out per `read_packets` call
const READ_BATCH: usize = 64;

/// In-memory [`VirtualInterface`]
pub struct MemoryInterface {
    outbound: tokio::sync::Mutex<mpsc::Receiver<Packet>>,
    delivered: mpsc::UnboundedSender<Packet>,
    applied: Mutex<Vec<InterfaceSettings>>,
    apply_failure: Mutex<Option<String>>,
}

/// Host side of a [`MemoryInterface`]
pub struct InterfaceHandle {
    outbound: mpsc::Sender<Packet>,
    delivered: mpsc::UnboundedReceiver<Packet>,
}

impl MemoryInterface {
    /// Create an interface whose outbound queue holds `capacity` packets
    pub fn new(capacity: usize) -> (Arc<Self>, InterfaceHandle) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();

        let interface = Arc::new(Self {
            outbound: tokio::sync::Mutex::new(outbound_rx),
            delivered: delivered_tx,
            applied: Mutex::new(Vec::new()),
            apply_failure: Mutex::new(None),
        });
        let handle = InterfaceHandle {
            outbound: outbound_tx,
            delivered: delivered_rx,
        };
        (interface, handle)
    }

    /// Make subsequent `apply_settings` calls fail with `reason`
    pub fn fail_settings(&self, reason: Option<String>) {
        if let Ok(mut failure) = self.apply_failure.lock() {
            *failure = reason;
        }
    }

    /// Every settings value applied so far, oldest first
    pub fn applied_settings(&self) -> Vec<InterfaceSettings> {
        self.applied
            .lock()
            .map(|applied| applied.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VirtualInterface for MemoryInterface {
    async fn apply_settings(&self, settings: &InterfaceSettings) -> Result<(), String> {
        let failure = self
            .apply_failure
            .lock()
            .map_err(|_| "settings lock poisoned".to_string())?
            .clone();
        if let Some(reason) = failure {
            return Err(reason);
        }

        self.applied
            .lock()
            .map_err(|_| "settings lock poisoned".to_string())?
            .push(settings.clone());
        Ok(())
    }

    async fn read_packets(&self) -> io::Result<Vec<Packet>> {
        let mut outbound = self.outbound.lock().await;
        let first = outbound.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "packet source closed")
        })?;

        let mut packets = vec![first];
        while packets.len() < READ_BATCH {
            match outbound.try_recv() {
                Ok(packet) => packets.push(packet),
                Err(_) => break,
            }
        }
        Ok(packets)
    }

    async fn write_packets(&self, packets: Vec<Packet>) -> io::Result<()> {
        for packet in packets {
            self.delivered
                .send(packet)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "packet sink closed"))?;
        }
        Ok(())
    }
}

impl InterfaceHandle {
    /// Queue a packet as if the OS had routed it into the tunnel
    pub async fn inject(&self, packet: Packet) -> io::Result<()> {
        self.outbound
            .send(packet)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "interface dropped"))
    }

    /// Non-blocking variant of [`inject`](Self::inject)
    pub fn try_inject(&self, packet: Packet) -> io::Result<()> {
        self.outbound.try_send(packet).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                io::Error::new(io::ErrorKind::WouldBlock, "outbound queue full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "interface dropped")
            }
        })
    }

    /// Next packet delivered to the OS side
    pub async fn next_delivered(&mut self) -> Option<Packet> {
        self.delivered.recv().await
    }

    /// A delivered packet if one is already waiting
    pub fn try_delivered(&mut self) -> Option<Packet> {
        self.delivered.try_recv().ok()
    }

    /// Split into the raw queue ends
    pub fn into_parts(self) -> (mpsc::Sender<Packet>, mpsc::UnboundedReceiver<Packet>) {
        (self.outbound, self.delivered)
    }
}
