//! `replay` subcommand: reads a session pack written by the relay's
//! recorder and re-emits it at (scaled) original cadence over the same
//! length-delimited TCP wire `generate` serves, converting each stored
//! `position_update`/`gate_metrics` envelope back into the upstream
//! position-text / gate-JSON frame shape the relay's parsers consume.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relay_wire::{Envelope, GateMetricsPayload, MessageType, PositionUpdatePayload};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::transport::{serve_listener, FrameBroadcaster};
use crate::upstream::{gate_frame, position_frame, GateEntry, PositionEntry};

pub struct ReplayConfig {
    pub pack_path: PathBuf,
    pub position_addr: String,
    pub gate_addr: String,
    pub speed: f64,
}

pub async fn run(cfg: ReplayConfig, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let position_listener = TcpListener::bind(&cfg.position_addr).await?;
    let gate_listener = TcpListener::bind(&cfg.gate_addr).await?;
    info!(pack = %cfg.pack_path.display(), "replaying session pack");

    let position_bc = Arc::new(FrameBroadcaster::new(64));
    let gate_bc = Arc::new(FrameBroadcaster::new(64));
    let position_task = tokio::spawn(serve_listener(
        "position",
        position_listener,
        position_bc.clone(),
        shutdown.clone(),
    ));
    let gate_task = tokio::spawn(serve_listener(
        "gate",
        gate_listener,
        gate_bc.clone(),
        shutdown.clone(),
    ));

    // Give a caller time to connect its consumer before replay starts.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let file = tokio::fs::File::open(&cfg.pack_path).await?;
    let mut lines = BufReader::new(file).lines();

    // First line is the pack's `_meta` header, not a replayable envelope.
    lines.next_line().await?;

    let mut last_ts_ms: Option<i64> = None;
    let mut emitted = 0u64;

    while let Some(line) = lines.next_line().await? {
        if *shutdown.borrow() {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unparseable pack line");
                continue;
            }
        };

        if let Some(prev) = last_ts_ms {
            let gap_ms = (envelope.ts_ms - prev).max(0) as f64 / cfg.speed.max(0.001);
            tokio::time::sleep(Duration::from_secs_f64(gap_ms / 1000.0)).await;
        }
        last_ts_ms = Some(envelope.ts_ms);

        match envelope.kind {
            MessageType::PositionUpdate => {
                if let Ok(payload) = serde_json::from_value::<PositionUpdatePayload>(envelope.payload) {
                    let entries = payload
                        .positions
                        .iter()
                        .map(|p| PositionEntry {
                            device_id: p.device_id,
                            lat: p.lat,
                            lon: p.lon,
                            alt_m: p.alt_m,
                            source_mask: 0b111,
                            device_ts_us: payload.server_ts_ms * 1000,
                        })
                        .collect::<Vec<_>>();
                    position_bc.send(position_frame(payload.server_ts_ms * 1000, &entries));
                    emitted += 1;
                }
            }
            MessageType::GateMetrics => {
                if let Ok(payload) = serde_json::from_value::<GateMetricsPayload>(envelope.payload) {
                    let entries = payload
                        .metrics
                        .iter()
                        .map(|m| GateEntry {
                            device_id: m.device_id,
                            d_perp_signed_m: m.d_perp_signed_m,
                            s_along: m.s_along,
                            eta_s: m.eta_s,
                            speed_to_line_mps: m.speed_to_line_mps,
                            gate_length_m: m.gate_length_m,
                            crossing_event: m.crossing_event,
                            crossing_confidence: m.crossing_confidence,
                            position_quality: m.position_quality,
                        })
                        .collect::<Vec<_>>();
                    gate_bc.send(gate_frame(payload.server_ts_ms * 1000, &entries));
                    emitted += 1;
                }
            }
            // start_line_definition/event/heartbeat/device_health are relay
            // output, not upstream input; the replay only re-emits what the
            // relay's own subscribers would have produced in the first place.
            _ => {}
        }
    }

    info!(emitted, "replay complete");
    position_task.abort();
    gate_task.abort();
    Ok(())
}
