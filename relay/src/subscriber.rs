//! Upstream Subscribers (C7): one long-lived consumer per upstream topic.
//!
//! Resolved Open Question (see SPEC_FULL.md §4.7 / DESIGN.md): the upstream
//! wire framing below "a UTF-8 block" / "JSON" is a plain `TcpStream` framed
//! with `LengthDelimitedCodec` (4-byte big-endian length prefix), one frame
//! per upstream batch. The relay is the TCP client; the positioning engine
//! (or `mock-producer generate`/`replay`) is the server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::queue::DropOldestQueue;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff, base 1s / cap 30s / ±20% jitter, reset on success.
struct Backoff {
    attempt: u32,
}

impl Backoff {
    fn new() -> Self {
        Self { attempt: 0 }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_delay(&mut self) -> Duration {
        let exp = BACKOFF_BASE.saturating_mul(1 << self.attempt.min(5));
        let capped = exp.min(BACKOFF_CAP);
        self.attempt += 1;

        let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered = capped.as_secs_f64() * (1.0 + jitter_frac);
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

fn strip_scheme(endpoint: &str) -> &str {
    endpoint
        .strip_prefix("tcp://")
        .unwrap_or(endpoint)
}

/// Drives one upstream topic: connect, frame, push raw frames to the
/// bounded inbound queue, reconnect with backoff on any disconnect.
/// Never returns except on shutdown signal.
pub async fn run_subscriber(
    topic: &'static str,
    endpoint: String,
    queue: Arc<DropOldestQueue<Vec<u8>>>,
    connected: Arc<AtomicBool>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let addr = strip_scheme(&endpoint).to_string();
    let mut backoff = Backoff::new();

    loop {
        if *shutdown.borrow() {
            return;
        }

        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            stream = TcpStream::connect(&addr) => {
                match stream {
                    Ok(stream) => {
                        info!(topic, %addr, "upstream connected");
                        connected.store(true, Ordering::Relaxed);
                        backoff.reset();

                        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
                        run_until_disconnect(topic, &mut framed, &queue, &mut shutdown).await;

                        connected.store(false, Ordering::Relaxed);
                        info!(topic, %addr, "upstream disconnected");
                    }
                    Err(e) => {
                        warn!(topic, %addr, error = %e, "upstream connect failed");
                    }
                }

                if *shutdown.borrow() {
                    return;
                }
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }
    }
}

async fn run_until_disconnect(
    topic: &'static str,
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    queue: &DropOldestQueue<Vec<u8>>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            frame = framed.next() => {
                match frame {
                    Some(Ok(bytes)) => {
                        debug!(topic, len = bytes.len(), "frame received");
                        queue.push(bytes.to_vec());
                    }
                    Some(Err(e)) => {
                        warn!(topic, error = %e, "frame decode error");
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tcp_scheme() {
        assert_eq!(strip_scheme("tcp://localhost:5000"), "localhost:5000");
        assert_eq!(strip_scheme("localhost:5000"), "localhost:5000");
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut b = Backoff::new();
        let mut last = Duration::ZERO;
        for _ in 0..10 {
            let d = b.next_delay();
            assert!(d <= BACKOFF_CAP + BACKOFF_CAP / 5);
            last = d;
        }
        let _ = last;
    }

    #[test]
    fn backoff_resets_to_near_base() {
        let mut b = Backoff::new();
        for _ in 0..5 {
            b.next_delay();
        }
        b.reset();
        let d = b.next_delay();
        assert!(d <= BACKOFF_BASE + BACKOFF_BASE / 5 + Duration::from_millis(1));
    }
}
