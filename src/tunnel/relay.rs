//! Bidirectional packet relay between the virtual interface and a channel
//!
//! Three tasks per connection: uplink (interface to channel), the channel's
//! receive loop, and a writer draining received packets into the interface.
//! Each direction is a single task feeding a FIFO, which is what keeps
//! per-direction order intact.

use super::VirtualInterface;
use crate::error::TransportError;
use crate::protocol::{preview, Packet};
use crate::transport::TunnelChannel;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Packets buffered between the receive loop and the interface writer
const DOWNLINK_QUEUE: usize = 256;

/// Called once per relay with the first fault that ended it
pub(crate) type FaultSink = Arc<dyn Fn(TransportError) + Send + Sync>;

pub(crate) struct Relay {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Relay {
    pub(crate) fn spawn(
        channel: Arc<dyn TunnelChannel>,
        interface: Arc<dyn VirtualInterface>,
        on_fault: FaultSink,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(DOWNLINK_QUEUE);

        let report = {
            let cancel = cancel.clone();
            move |error: TransportError| {
                // A cancelled relay is being torn down on purpose
                if !cancel.is_cancelled() {
                    on_fault(error);
                }
            }
        };
        let report: FaultSink = Arc::new(report);

        let tasks = vec![
            tokio::spawn(uplink(
                Arc::clone(&channel),
                Arc::clone(&interface),
                cancel.clone(),
                Arc::clone(&report),
            )),
            tokio::spawn(receive(Arc::clone(&channel), tx, cancel.clone(), Arc::clone(&report))),
            tokio::spawn(downlink(interface, rx, cancel.clone(), report)),
        ];

        Self { cancel, tasks }
    }

    /// Cancel all relay tasks and wait for them to finish.
    ///
    /// Once this returns no packet reaches the interface or the channel.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    log::error!("Relay task panicked: {e}");
                }
            }
        }
    }
}

async fn uplink(
    channel: Arc<dyn TunnelChannel>,
    interface: Arc<dyn VirtualInterface>,
    cancel: CancellationToken,
    report: FaultSink,
) {
    loop {
        let packets = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            read = interface.read_packets() => match read {
                Ok(packets) => packets,
                Err(e) => {
                    report(TransportError::closed(format!("interface read failed: {e}")));
                    return;
                }
            },
        };

        for packet in packets {
            log::trace!("-> {} bytes {}", packet.len(), preview(&packet));
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = channel.send(packet) => sent,
            };
            if let Err(e) = sent {
                report(e);
                return;
            }
        }
    }
}

async fn receive(
    channel: Arc<dyn TunnelChannel>,
    sink: mpsc::Sender<Packet>,
    cancel: CancellationToken,
    report: FaultSink,
) {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = channel.receive_loop(sink) => result,
    };

    match result {
        Err(e) => report(e),
        Ok(()) => report(TransportError::closed("receive loop ended")),
    }
}

async fn downlink(
    interface: Arc<dyn VirtualInterface>,
    mut queue: mpsc::Receiver<Packet>,
    cancel: CancellationToken,
    report: FaultSink,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            packet = queue.recv() => match packet {
                Some(packet) => packet,
                None => return,
            },
        };

        let mut batch = vec![first];
        while let Ok(packet) = queue.try_recv() {
            batch.push(packet);
        }

        if cancel.is_cancelled() {
            return;
        }
        for packet in &batch {
            log::trace!("<- {} bytes {}", packet.len(), preview(packet));
        }
        if let Err(e) = interface.write_packets(batch).await {
            report(TransportError::closed(format!("interface write failed: {e}")));
            return;
        }
    }
}
