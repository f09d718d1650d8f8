//! Upstream frame parsers. Pure, infallible-by-signature: malformed records
//! are dropped and counted, never propagated as an `Err` that would abort
//! the rest of the batch.

use relay_wire::{CrossingEvent, GateMetric, PositionQuality, PositionSample};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub seen: usize,
    pub dropped: usize,
}

/// Parsed position-text batch: `SERVER_TS:<us>` header, `COUNT:<n>`, then `n`
/// `POS:` lines. Tolerates a missing/mismatched `COUNT`, blank lines, and
/// trailing whitespace — it recovers and returns whatever parsed.
pub fn parse_position_batch(input: &str) -> (i64, Vec<PositionSample>, ParseStats) {
    let mut server_ts_us = 0i64;
    let mut samples = Vec::new();
    let mut stats = ParseStats::default();

    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("SERVER_TS:") {
            server_ts_us = rest.trim().parse().unwrap_or(0);
            continue;
        }
        if line.strip_prefix("COUNT:").is_some() {
            // Advisory only; actual count is however many POS: lines parse.
            continue;
        }
        if let Some(rest) = line.strip_prefix("POS:") {
            stats.seen += 1;
            match parse_position_line(rest) {
                Some(sample) => samples.push(sample),
                None => stats.dropped += 1,
            }
            continue;
        }
        // Unknown line kind: ignore silently (forward-compatible with new headers).
    }

    (server_ts_us, samples, stats)
}

fn parse_position_line(rest: &str) -> Option<PositionSample> {
    let fields: Vec<&str> = rest.split(':').collect();
    if fields.len() < 6 {
        return None;
    }
    let device_id: u32 = fields[0].trim().parse().ok()?;
    let lat: f64 = fields[1].trim().parse().ok()?;
    let lon: f64 = fields[2].trim().parse().ok()?;
    let alt_m: f64 = fields[3].trim().parse().ok()?;
    let source_mask: u32 = fields[4].trim().parse().ok()?;
    let device_ts_us: i64 = fields[5].trim().parse().ok()?;

    Some(PositionSample {
        device_id,
        lat,
        lon,
        alt_m,
        source_mask,
        device_ts_us,
        vel_e_mps: None,
        vel_n_mps: None,
    })
}

// ---------------------------------------------------------------------------
// Gate metrics (JSON)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GateBatchRaw {
    server_timestamp_us: i64,
    #[serde(default)]
    metrics: Vec<serde_json::Value>,
    #[serde(default)]
    #[allow(dead_code)]
    alerts: Vec<serde_json::Value>,
}

pub fn parse_gate_batch(input: &str) -> (i64, Vec<GateMetric>, ParseStats) {
    let mut stats = ParseStats::default();
    let raw: GateBatchRaw = match serde_json::from_str(input) {
        Ok(r) => r,
        Err(_) => return (0, Vec::new(), stats),
    };

    let mut metrics = Vec::new();
    for m in &raw.metrics {
        stats.seen += 1;
        match parse_gate_metric(m) {
            Some(metric) => metrics.push(metric),
            None => stats.dropped += 1,
        }
    }

    (raw.server_timestamp_us, metrics, stats)
}

fn parse_gate_metric(v: &serde_json::Value) -> Option<GateMetric> {
    let device_id = v.get("device_id").or_else(|| v.get("dev"))?.as_u64()? as u32;
    let d_perp_signed_m = v.get("d_perp_signed_m")?.as_f64()?;
    let s_along = v.get("s_along")?.as_f64()?;
    let gate_length_m = v.get("gate_length_m")?.as_f64()?;
    let crossing_confidence = v.get("crossing_confidence")?.as_f64()?;

    let crossing_event = match v.get("crossing_event")?.as_str()? {
        "NO_CROSSING" => CrossingEvent::NoCrossing,
        "CROSSING_LEFT" => CrossingEvent::CrossingLeft,
        "CROSSING_RIGHT" => CrossingEvent::CrossingRight,
        _ => return None,
    };

    let position_quality = match v.get("position_quality")?.as_str()? {
        "GOOD" => PositionQuality::Good,
        "DEGRADED" => PositionQuality::Degraded,
        "UNKNOWN" => PositionQuality::Unknown,
        _ => return None,
    };

    let eta_s = v.get("time_to_line_s").and_then(|x| x.as_f64());
    let speed_to_line_mps = v.get("speed_to_line_mps").and_then(|x| x.as_f64());

    Some(GateMetric {
        device_id,
        d_perp_signed_m,
        s_along,
        eta_s,
        speed_to_line_mps,
        gate_length_m,
        crossing_event,
        crossing_confidence,
        position_quality,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_position_batch() {
        let input = "SERVER_TS:1700000000000000\nCOUNT:2\nPOS:1:22.12:114.12:1.5:3:1700000000000000\nPOS:2:22.121:114.121:1.4:3:1700000000100000\n";
        let (ts, samples, stats) = parse_position_batch(input);
        assert_eq!(ts, 1_700_000_000_000_000);
        assert_eq!(samples.len(), 2);
        assert_eq!(stats.seen, 2);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn drops_malformed_line_but_keeps_the_rest() {
        let input = "SERVER_TS:1\nCOUNT:2\nPOS:garbage\nPOS:2:22.121:114.121:1.4:3:100\n";
        let (_, samples, stats) = parse_position_batch(input);
        assert_eq!(samples.len(), 1);
        assert_eq!(stats.seen, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn tolerates_missing_count_and_mismatched_count() {
        let input = "SERVER_TS:1\nCOUNT:99\nPOS:1:22.12:114.12:1.5:3:1\n";
        let (_, samples, _) = parse_position_batch(input);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn tolerates_trailing_whitespace_and_blank_lines() {
        let input = "SERVER_TS:1  \n\nCOUNT:1\n\nPOS:1:22.12:114.12:1.5:3:1  \n\n";
        let (_, samples, _) = parse_position_batch(input);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn parses_gate_batch_and_drops_invalid_metric() {
        let input = serde_json::json!({
            "server_timestamp_us": 1_700_000_000_000_000i64,
            "metrics": [
                {
                    "device_id": 1,
                    "d_perp_signed_m": -5.2,
                    "s_along": 0.4,
                    "time_to_line_s": 3.1,
                    "speed_to_line_mps": 4.8,
                    "gate_length_m": 523.0,
                    "crossing_event": "NO_CROSSING",
                    "crossing_confidence": 0.9,
                    "position_quality": "GOOD"
                },
                { "device_id": 2 }
            ],
            "alerts": []
        })
        .to_string();

        let (ts, metrics, stats) = parse_gate_batch(&input);
        assert_eq!(ts, 1_700_000_000_000_000);
        assert_eq!(metrics.len(), 1);
        assert_eq!(stats.seen, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(metrics[0].device_id, 1);
    }

    #[test]
    fn gate_batch_with_unparseable_json_yields_empty_without_panicking() {
        let (_, metrics, _) = parse_gate_batch("not json");
        assert!(metrics.is_empty());
    }
}
