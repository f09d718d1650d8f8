//! Builds upstream wire frames byte-for-byte compatible with what
//! `relay::parsers` parses: the `SERVER_TS:`/`COUNT:`/`POS:` position-text
//! block, and the `{"server_timestamp_us", "metrics", "alerts"}` gate JSON
//! block.

use bytes::Bytes;
use relay_wire::{CrossingEvent, PositionQuality};

pub struct PositionEntry {
    pub device_id: u32,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    pub source_mask: u32,
    pub device_ts_us: i64,
}

pub fn position_frame(server_ts_us: i64, entries: &[PositionEntry]) -> Bytes {
    let mut out = format!("SERVER_TS:{server_ts_us}\nCOUNT:{}\n", entries.len());
    for e in entries {
        out.push_str(&format!(
            "POS:{}:{}:{}:{}:{}:{}\n",
            e.device_id, e.lat, e.lon, e.alt_m, e.source_mask, e.device_ts_us
        ));
    }
    Bytes::from(out.into_bytes())
}

pub struct GateEntry {
    pub device_id: u32,
    pub d_perp_signed_m: f64,
    pub s_along: f64,
    pub eta_s: Option<f64>,
    pub speed_to_line_mps: Option<f64>,
    pub gate_length_m: f64,
    pub crossing_event: CrossingEvent,
    pub crossing_confidence: f64,
    pub position_quality: PositionQuality,
}

fn crossing_event_str(e: CrossingEvent) -> &'static str {
    match e {
        CrossingEvent::NoCrossing => "NO_CROSSING",
        CrossingEvent::CrossingLeft => "CROSSING_LEFT",
        CrossingEvent::CrossingRight => "CROSSING_RIGHT",
    }
}

fn position_quality_str(q: PositionQuality) -> &'static str {
    match q {
        PositionQuality::Good => "GOOD",
        PositionQuality::Degraded => "DEGRADED",
        PositionQuality::Unknown => "UNKNOWN",
    }
}

pub fn gate_frame(server_ts_us: i64, entries: &[GateEntry]) -> Bytes {
    let metrics: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            serde_json::json!({
                "device_id": e.device_id,
                "d_perp_signed_m": e.d_perp_signed_m,
                "s_along": e.s_along,
                "time_to_line_s": e.eta_s,
                "speed_to_line_mps": e.speed_to_line_mps,
                "gate_length_m": e.gate_length_m,
                "crossing_event": crossing_event_str(e.crossing_event),
                "crossing_confidence": e.crossing_confidence,
                "position_quality": position_quality_str(e.position_quality),
            })
        })
        .collect();

    let body = serde_json::json!({
        "server_timestamp_us": server_ts_us,
        "metrics": metrics,
        "alerts": [],
    });
    Bytes::from(body.to_string().into_bytes())
}
