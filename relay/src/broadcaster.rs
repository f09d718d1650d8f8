//! Broadcaster (C9): fans every outbound envelope to all connected clients,
//! applying the per-client backpressure policy from spec §4.9. Each client's
//! send path runs on its own task (`run_client_sender`) so one slow consumer
//! cannot stall the others — grounded in the pack's split-socket
//! sender/receiver pattern (`ws_forwarder.rs`/`ws_common.rs`).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use relay_wire::{Envelope, MessageType};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Per-client bounded outbound queue plus the state needed to evaluate the
/// "slow consumer" grace period.
pub struct ClientQueue {
    capacity: usize,
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    overflow_since: Mutex<Option<Instant>>,
    should_close: AtomicBool,
    close_signal: Notify,
    dropped: AtomicU64,
}

impl ClientQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            overflow_since: Mutex::new(None),
            should_close: AtomicBool::new(false),
            close_signal: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Apply the backpressure policy and enqueue. See spec §4.9:
    /// 1. drop the oldest heartbeat, 2. else drop the oldest
    /// position_update/gate_metrics, 3. never drop event/start_line_definition
    /// — if nothing is evictable, mark overflow and eventually disconnect.
    fn enqueue(&self, envelope: Envelope, grace: Duration) {
        let mut q = self.queue.lock().unwrap();

        if q.len() < self.capacity {
            q.push_back(envelope);
            drop(q);
            *self.overflow_since.lock().unwrap() = None;
            self.notify.notify_one();
            return;
        }

        let evict_pos = q
            .iter()
            .position(|e| e.kind == MessageType::Heartbeat)
            .or_else(|| {
                q.iter()
                    .position(|e| matches!(e.kind, MessageType::PositionUpdate | MessageType::GateMetrics))
            });

        match evict_pos {
            Some(pos) => {
                q.remove(pos);
                q.push_back(envelope);
                drop(q);
                *self.overflow_since.lock().unwrap() = None;
                self.notify.notify_one();
            }
            None => {
                // Queue is saturated with events/start_line_definitions: nothing
                // may be dropped. The new envelope is shed instead; if this
                // persists beyond the grace period, disconnect the client.
                drop(q);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let mut since = self.overflow_since.lock().unwrap();
                let started = *since.get_or_insert_with(Instant::now);
                if Instant::now().duration_since(started) >= grace {
                    self.should_close.store(true, Ordering::Relaxed);
                    self.close_signal.notify_one();
                }
            }
        }
    }

    fn try_pop(&self) -> Option<Envelope> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

type ClientId = u64;

/// Tracks connected clients; fans out messages; owns the client set (single
/// writer: register/unregister only ever happen from the `/ws` handler task
/// and this struct's own bookkeeping, per spec §5).
pub struct Broadcaster {
    clients: Mutex<HashMap<ClientId, Arc<ClientQueue>>>,
    next_id: AtomicU64,
    queue_depth: usize,
    slow_client_grace: Duration,
}

impl Broadcaster {
    pub fn new(queue_depth: usize, slow_client_grace: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_depth,
            slow_client_grace,
        }
    }

    pub fn register(&self) -> (ClientId, Arc<ClientQueue>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cq = Arc::new(ClientQueue::new(self.queue_depth));
        self.clients.lock().unwrap().insert(id, cq.clone());
        (id, cq)
    }

    /// Idempotent: removing an id twice is a no-op.
    pub fn unregister(&self, id: ClientId) {
        self.clients.lock().unwrap().remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Fan one envelope out to every connected client's queue. Non-blocking:
    /// each enqueue is a bounded, synchronous `VecDeque` operation.
    pub fn publish(&self, envelope: &Envelope) {
        let clients = self.clients.lock().unwrap();
        for cq in clients.values() {
            cq.enqueue(envelope.clone(), self.slow_client_grace);
        }
    }
}

/// Per-client sender task: drains the client's queue and writes frames to
/// its WebSocket sink with a write timeout (spec §5 "Cancellation and
/// timeouts"). Exceeding it, or a persistent undroppable-overflow
/// condition, disconnects the client.
pub async fn run_client_sender(
    mut sink: SplitSink<WebSocket, Message>,
    cq: Arc<ClientQueue>,
    write_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = cq.close_signal.notified() => {
                if cq.should_close.load(Ordering::Relaxed) {
                    warn!("disconnecting slow consumer");
                    let frame = CloseFrame {
                        code: close_code::AGAIN,
                        reason: "slow consumer".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    return;
                }
            }
            _ = cq.notify.notified() => {
                while let Some(envelope) = cq.try_pop() {
                    let text = match serde_json::to_string(&envelope) {
                        Ok(t) => t,
                        Err(e) => {
                            debug!(error = %e, "failed to serialize envelope, dropping");
                            continue;
                        }
                    };
                    match tokio::time::timeout(write_timeout, sink.send(Message::Text(text.into()))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) | Err(_) => return,
                    }
                    if cq.should_close.load(Ordering::Relaxed) {
                        let frame = CloseFrame {
                            code: close_code::AGAIN,
                            reason: "slow consumer".into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        return;
                    }
                }
            }
        }
    }
}
