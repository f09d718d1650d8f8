//! Heartbeat & Watchdog (C12): periodic heartbeat envelope plus stale-device
//! detection. The watchdog is the sole writer of `DEVICE_OFFLINE` /
//! `DEVICE_ONLINE` events (spec §4.12) — no other task ever emits them.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use relay_wire::{
    AthleteStatus, DeviceHealthEntry, DeviceHealthPayload, EventKind, EventPayload,
    HeartbeatPayload, MessageType, StartLineDefinitionPayload,
};
use tokio::sync::watch;

use crate::fabricator::now_ms;
use crate::state::AppState;

pub async fn run_watchdog(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(state.config.heartbeat_interval_s.max(1));
    let stale_after_ms = (state.config.threshold_stale_s * 1000.0) as i64;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return; }
            }
            _ = ticker.tick() => {
                emit_heartbeat(&state).await;
                emit_device_health_transitions(&state, stale_after_ms).await;
                emit_device_health_snapshot(&state).await;
                emit_start_line_quality_change(&state).await;
            }
        }
    }
}

async fn emit_heartbeat(state: &Arc<AppState>) {
    let athletes_tracked = state.state_table.lock().unwrap().device_ids().len();
    let payload = HeartbeatPayload {
        uptime_s: state.uptime_s(),
        connected_clients: state.broadcaster.client_count(),
        position_upstream_connected: state.position_connected.load(Ordering::Relaxed),
        gate_upstream_connected: state.gate_connected.load(Ordering::Relaxed),
        athletes_tracked,
        messages_relayed: state.messages_relayed.load(Ordering::Relaxed),
    };
    let envelope = state.fabricator.fabricate(
        MessageType::Heartbeat,
        serde_json::to_value(&payload).unwrap_or_default(),
    );
    state.publish(envelope).await;
}

/// An anchor going stale degrades `quality` with no new position update to
/// trigger `StartLineTracker::maybe_announce`'s geometry-change check; this
/// republishes `start_line_definition` whenever the quality verdict alone
/// has moved (spec §4.6, DEVICE_DROPOUT scenario).
async fn emit_start_line_quality_change(state: &Arc<AppState>) {
    let now = now_ms();
    let payload: Option<StartLineDefinitionPayload> = {
        let mut tracker = state.start_line.lock().unwrap();
        tracker.recheck_quality(now)
    };
    if let Some(payload) = payload {
        let envelope = state.fabricator.fabricate(
            MessageType::StartLineDefinition,
            serde_json::to_value(&payload).unwrap_or_default(),
        );
        state.publish(envelope).await;
    }
}

/// Full device_health snapshot (C8's `device_health` message type), one per
/// heartbeat cadence, distinct from the per-transition `DEVICE_OFFLINE`/
/// `DEVICE_ONLINE` events above: this is the point-in-time view a newly
/// connected client needs without waiting for the next transition.
async fn emit_device_health_snapshot(state: &Arc<AppState>) {
    let now = now_ms();
    let devices = {
        let table = state.state_table.lock().unwrap();
        table
            .all_snapshots()
            .into_iter()
            .map(|s| DeviceHealthEntry {
                device_id: s.device_id,
                online: s.status != AthleteStatus::Stale,
                last_update_ms_ago: (now - s.last_update_ms).max(0),
            })
            .collect()
    };
    let payload = DeviceHealthPayload { devices };
    let envelope = state.fabricator.fabricate(
        MessageType::DeviceHealth,
        serde_json::to_value(&payload).unwrap_or_default(),
    );
    state.publish(envelope).await;
}

async fn emit_device_health_transitions(state: &Arc<AppState>, stale_after_ms: i64) {
    let now = now_ms();
    let transitions = {
        let mut table = state.state_table.lock().unwrap();
        table.sweep_staleness(now, stale_after_ms)
    };

    for (device_id, came_online) in transitions {
        let record = state.registry.lookup(device_id);
        let event = EventPayload {
            kind: if came_online {
                EventKind::DeviceOnline
            } else {
                EventKind::DeviceOffline
            },
            device_id,
            athlete_id: record.athlete_id,
            old_status: None,
            new_status: None,
            message: None,
        };
        let envelope = state.fabricator.fabricate(
            MessageType::Event,
            serde_json::to_value(&event).unwrap_or_default(),
        );
        state.publish(envelope).await;
    }
}
