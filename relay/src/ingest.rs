//! Ingest pipeline (C3 position / C4 classify, wired together per topic):
//! drains a subscriber's raw-frame queue, parses, updates the athlete state
//! table and start line, classifies, and hands fabricated envelopes to
//! `AppState::publish`. One task per upstream topic, matching the
//! subscriber → ingest → fabricator chain in spec §5 so per-device order is
//! preserved end to end.

use std::sync::Arc;

use relay_wire::{
    EventKind, EventPayload, GateMetricEntry, GateMetricsPayload, MessageType,
    PositionUpdateEntry, PositionUpdatePayload,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::fabricator::now_ms;
use crate::parsers;
use crate::queue::DropOldestQueue;
use crate::state::AppState;

pub async fn run_position_ingest(
    state: Arc<AppState>,
    queue: Arc<DropOldestQueue<Vec<u8>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let bytes = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return; }
                continue;
            }
            bytes = queue.pop() => bytes,
        };

        let text = String::from_utf8_lossy(&bytes);
        let (_server_ts_us, samples, stats) = parsers::parse_position_batch(&text);
        {
            let mut cumulative = state.position_parse_stats.lock().unwrap();
            cumulative.seen += stats.seen;
            cumulative.dropped += stats.dropped;
        }
        if samples.is_empty() {
            continue;
        }

        let now = now_ms();
        let mut entries = Vec::with_capacity(samples.len());

        for sample in &samples {
            {
                let mut table = state.state_table.lock().unwrap();
                table.apply_position(*sample, now);
            }

            let is_anchor = sample.device_id == state.config.anchor_left_device_id
                || sample.device_id == state.config.anchor_right_device_id;
            if is_anchor {
                let announced = {
                    let mut tracker = state.start_line.lock().unwrap();
                    tracker.apply_position(sample, now)
                };
                if let Some(payload) = announced {
                    let envelope = state.fabricator.fabricate(
                        MessageType::StartLineDefinition,
                        serde_json::to_value(&payload).unwrap_or_default(),
                    );
                    state.publish(envelope).await;
                }
            }

            let record = state.registry.lookup(sample.device_id);
            let kinematics = {
                let table = state.state_table.lock().unwrap();
                table.snapshot(sample.device_id).and_then(|s| s.kinematics)
            };
            entries.push(PositionUpdateEntry {
                device_id: sample.device_id,
                athlete_id: record.athlete_id,
                name: record.name,
                team: record.team,
                lat: sample.lat,
                lon: sample.lon,
                alt_m: sample.alt_m,
                sog_knots: kinematics.map(|k| k.sog_knots),
                cog_deg: kinematics.map(|k| k.cog_deg),
            });
        }

        let payload = PositionUpdatePayload {
            server_ts_ms: now,
            positions: entries,
        };
        let envelope = state.fabricator.fabricate(
            MessageType::PositionUpdate,
            serde_json::to_value(&payload).unwrap_or_default(),
        );
        state.publish(envelope).await;
        debug!(count = payload.positions.len(), "position batch relayed");
    }
}

pub async fn run_gate_ingest(
    state: Arc<AppState>,
    queue: Arc<DropOldestQueue<Vec<u8>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let bytes = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return; }
                continue;
            }
            bytes = queue.pop() => bytes,
        };

        let text = match std::str::from_utf8(&bytes) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "gate batch was not valid utf-8, dropping");
                continue;
            }
        };
        let (_server_ts_us, mut metrics, stats) = parsers::parse_gate_batch(text);
        {
            let mut cumulative = state.gate_parse_stats.lock().unwrap();
            cumulative.seen += stats.seen;
            cumulative.dropped += stats.dropped;
        }
        if metrics.is_empty() {
            continue;
        }

        if state.config.gate_sign_flip {
            for m in &mut metrics {
                m.d_perp_signed_m = -m.d_perp_signed_m;
            }
        }

        let now = now_ms();
        let thresholds = state.classifier_thresholds();
        let start_signal_ts_ms = state.start_signal_ts_ms();
        let mut entries = Vec::with_capacity(metrics.len());
        let mut events = Vec::new();

        for metric in metrics {
            let device_id = metric.device_id;
            let outcome = {
                let mut table = state.state_table.lock().unwrap();
                table.apply_gate_metric(metric, now, start_signal_ts_ms, thresholds)
            };

            let record = state.registry.lookup(device_id);
            entries.push(GateMetricEntry {
                device_id,
                athlete_id: record.athlete_id.clone(),
                d_perp_signed_m: metric.d_perp_signed_m,
                s_along: metric.s_along,
                eta_s: metric.eta_s,
                speed_to_line_mps: metric.speed_to_line_mps,
                gate_length_m: metric.gate_length_m,
                crossing_event: metric.crossing_event,
                crossing_confidence: metric.crossing_confidence,
                position_quality: metric.position_quality,
                status: outcome.status,
            });

            if outcome.crossing_event_to_emit {
                events.push(EventPayload {
                    kind: EventKind::Crossing,
                    device_id,
                    athlete_id: record.athlete_id.clone(),
                    old_status: None,
                    new_status: Some(outcome.status),
                    message: None,
                });
            }
            if outcome.ocs_event_to_emit {
                events.push(EventPayload {
                    kind: EventKind::Ocs,
                    device_id,
                    athlete_id: record.athlete_id,
                    old_status: None,
                    new_status: Some(outcome.status),
                    message: None,
                });
            }
        }

        let payload = GateMetricsPayload {
            server_ts_ms: now,
            metrics: entries,
        };
        let envelope = state.fabricator.fabricate(
            MessageType::GateMetrics,
            serde_json::to_value(&payload).unwrap_or_default(),
        );
        state.publish(envelope).await;

        for event in events {
            let envelope = state.fabricator.fabricate(
                MessageType::Event,
                serde_json::to_value(&event).unwrap_or_default(),
            );
            state.publish(envelope).await;
        }
        debug!(count = payload.metrics.len(), "gate metrics batch relayed");
    }
}
