//! TCP server side of the length-delimited upstream wire (the producer
//! plays the role the relay's `subscriber.rs` dials into). One listener per
//! topic; every tick's frame fans out to whichever consumers are currently
//! connected via a broadcast channel, the same fan-out primitive the
//! teacher's `main.rs` uses for its control-panel telemetry broadcast.
//! Send failures are logged and drop only that connection — matching the
//! teacher's `udp_tx.rs` rule that a transmit error never crashes the sim.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{info, warn};

pub struct FrameBroadcaster {
    tx: broadcast::Sender<Bytes>,
}

impl FrameBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fan one frame out. No-op (not an error) if nothing is connected yet.
    pub fn send(&self, frame: Bytes) {
        let _ = self.tx.send(frame);
    }

    fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }
}

/// Accept loop for one topic's listener: every accepted connection gets its
/// own forwarding task and its own broadcast subscription.
pub async fn serve_listener(
    topic: &'static str,
    listener: TcpListener,
    broadcaster: Arc<FrameBroadcaster>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!(topic, %peer, "consumer connected");
                        let rx = broadcaster.subscribe();
                        tokio::spawn(serve_connection(topic, stream, rx, shutdown.clone()));
                    }
                    Err(e) => warn!(topic, error = %e, "accept failed"),
                }
            }
        }
    }
}

async fn serve_connection(
    topic: &'static str,
    stream: TcpStream,
    mut rx: broadcast::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            frame = rx.recv() => {
                match frame {
                    Ok(bytes) => {
                        if let Err(e) = framed.send(bytes).await {
                            warn!(topic, error = %e, "send failed, dropping consumer");
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic, skipped = n, "consumer lagged, frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}
