//! Wire types shared between the relay and the mock producer.
//!
//! This crate owns the one contract both sides must agree on bit-exactly:
//! the outbound envelope and its payload shapes, plus the upstream wire
//! formats the relay parses and the mock producer emits.

use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Outbound envelope (downstream WebSocket contract)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    PositionUpdate,
    GateMetrics,
    StartLineDefinition,
    DeviceHealth,
    Event,
    Heartbeat,
}

/// The outer object carrying every downstream message: `{type, schema_version,
/// seq, ts_ms, session_id, payload}`. Field names and casing are part of the
/// contract and must not drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub schema_version: String,
    pub seq: u64,
    pub ts_ms: i64,
    pub session_id: Option<String>,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(
        kind: MessageType,
        seq: u64,
        ts_ms: i64,
        session_id: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            schema_version: SCHEMA_VERSION.to_string(),
            seq,
            ts_ms,
            session_id,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Athlete identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AthleteRecord {
    pub athlete_id: String,
    pub device_id: u32,
    pub name: String,
    pub team: String,
}

impl AthleteRecord {
    /// Synthetic record for a device id with no registry entry.
    pub fn unknown(device_id: u32) -> Self {
        Self {
            athlete_id: format!("T{device_id}"),
            device_id,
            name: format!("Unknown {device_id}"),
            team: "—".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Position stream
// ---------------------------------------------------------------------------

/// One parsed `POS:` line from the position-text upstream frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositionSample {
    pub device_id: u32,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    pub source_mask: u32,
    /// Device clock, upstream time base, microseconds.
    pub device_ts_us: i64,
    /// Optional velocity override, present once upstream adds it.
    pub vel_e_mps: Option<f64>,
    pub vel_n_mps: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Kinematics {
    pub sog_knots: f64,
    pub cog_deg: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PositionUpdateEntry {
    pub device_id: u32,
    pub athlete_id: String,
    pub name: String,
    pub team: String,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    pub sog_knots: Option<f64>,
    pub cog_deg: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PositionUpdatePayload {
    pub server_ts_ms: i64,
    pub positions: Vec<PositionUpdateEntry>,
}

// ---------------------------------------------------------------------------
// Gate metrics stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrossingEvent {
    NoCrossing,
    CrossingLeft,
    CrossingRight,
}

impl Default for CrossingEvent {
    fn default() -> Self {
        CrossingEvent::NoCrossing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionQuality {
    Good,
    Degraded,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GateMetric {
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

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GateMetricsPayload {
    pub server_ts_ms: i64,
    pub metrics: Vec<GateMetricEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GateMetricEntry {
    pub device_id: u32,
    pub athlete_id: String,
    pub d_perp_signed_m: f64,
    pub s_along: f64,
    pub eta_s: Option<f64>,
    pub speed_to_line_mps: Option<f64>,
    pub gate_length_m: f64,
    pub crossing_event: CrossingEvent,
    pub crossing_confidence: f64,
    pub position_quality: PositionQuality,
    pub status: AthleteStatus,
}

// ---------------------------------------------------------------------------
// Status classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AthleteStatus {
    Safe,
    Approaching,
    Risk,
    Crossed,
    Ocs,
    Stale,
}

impl Default for AthleteStatus {
    fn default() -> Self {
        AthleteStatus::Safe
    }
}

// ---------------------------------------------------------------------------
// Start line
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineQuality {
    Good,
    Degraded,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorPoint {
    pub device_id: u32,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartLineDefinitionPayload {
    pub anchor_left: AnchorPoint,
    pub anchor_right: AnchorPoint,
    pub gate_length_m: f64,
    pub quality: LineQuality,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Crossing,
    Ocs,
    DeviceOffline,
    DeviceOnline,
    SystemError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub kind: EventKind,
    pub device_id: u32,
    pub athlete_id: String,
    pub old_status: Option<AthleteStatus>,
    pub new_status: Option<AthleteStatus>,
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Heartbeat / device health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub uptime_s: u64,
    pub connected_clients: usize,
    pub position_upstream_connected: bool,
    pub gate_upstream_connected: bool,
    pub athletes_tracked: usize,
    pub messages_relayed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHealthEntry {
    pub device_id: u32,
    pub online: bool,
    pub last_update_ms_ago: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHealthPayload {
    pub devices: Vec<DeviceHealthEntry>,
}

// ---------------------------------------------------------------------------
// Session pack header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackMetaHeader {
    #[serde(rename = "_meta")]
    pub meta: bool,
    pub schema_version: String,
    pub session_id: String,
    pub created: String,
    pub description: Option<String>,
}

impl PackMetaHeader {
    pub fn new(session_id: String, created: String, description: Option<String>) -> Self {
        Self {
            meta: true,
            schema_version: SCHEMA_VERSION.to_string(),
            session_id,
            created,
            description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_type_field_serializes_as_snake_case() {
        let env = Envelope::new(
            MessageType::StartLineDefinition,
            1,
            0,
            None,
            serde_json::json!({}),
        );
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "start_line_definition");
        assert_eq!(v["schema_version"], "1.0");
    }

    #[test]
    fn unknown_athlete_record_matches_convention() {
        let rec = AthleteRecord::unknown(42);
        assert_eq!(rec.athlete_id, "T42");
        assert_eq!(rec.name, "Unknown 42");
        assert_eq!(rec.team, "—");
    }

    #[test]
    fn status_serializes_screaming_snake_case() {
        let v = serde_json::to_value(AthleteStatus::Approaching).unwrap();
        assert_eq!(v, "APPROACHING");
    }
}
