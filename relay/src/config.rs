use std::net::SocketAddr;
use std::path::PathBuf;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Relay-wide configuration, resolved once at startup from the environment.
/// Mirrors the "env var with a typed default" shape used throughout this
/// lineage for per-process configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub position_endpoint: String,
    pub gate_endpoint: String,
    pub bind_addr: SocketAddr,

    pub threshold_distance_m: f64,
    pub threshold_time_s: f64,
    pub threshold_stale_s: f64,
    pub heartbeat_interval_s: u64,
    pub gate_sign_flip: bool,

    pub anchor_left_device_id: u32,
    pub anchor_right_device_id: u32,

    pub session_dir: PathBuf,
    pub athletes_config: PathBuf,

    // Bounded-queue sizing (spec.md §5 "Bounded resources").
    pub subscriber_queue_depth: usize,
    pub recorder_queue_depth: usize,
    pub client_queue_depth: usize,

    // Geometry-change threshold for re-announcing the start line (§4.6).
    pub line_geometry_change_m: f64,
    // Hysteresis window for classifier candidate-state transitions (§4.4).
    pub classifier_hysteresis_ms: u64,
    // Backpressure grace period before disconnecting a slow client (§4.9).
    pub slow_client_grace_s: u64,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, crate::error::RelayError> {
        let host = env_string_or("HOST", "0.0.0.0");
        let port: u16 = env_or("PORT", 8000);
        let bind_addr = format!("{host}:{port}")
            .parse()
            .map_err(|e| crate::error::RelayError::Config(format!("invalid host/port: {e}")))?;

        Ok(Self {
            position_endpoint: env_string_or("POSITION_ENDPOINT", "tcp://localhost:5000"),
            gate_endpoint: env_string_or("GATE_ENDPOINT", "tcp://localhost:5001"),
            bind_addr,
            threshold_distance_m: env_or("THRESHOLD_DISTANCE_M", 50.0),
            threshold_time_s: env_or("THRESHOLD_TIME_S", 5.0),
            threshold_stale_s: env_or("THRESHOLD_STALE_S", 3.0),
            heartbeat_interval_s: env_or("HEARTBEAT_INTERVAL_S", 5),
            gate_sign_flip: env_or("GATE_SIGN_FLIP", false),
            anchor_left_device_id: env_or("ANCHOR_LEFT_DEVICE_ID", 101),
            anchor_right_device_id: env_or("ANCHOR_RIGHT_DEVICE_ID", 102),
            session_dir: PathBuf::from(env_string_or("SESSION_DIR", "./data/session_packs")),
            athletes_config: PathBuf::from(env_string_or(
                "ATHLETES_CONFIG",
                "./data/athletes.json",
            )),
            subscriber_queue_depth: env_or("SUBSCRIBER_QUEUE_DEPTH", 256),
            recorder_queue_depth: env_or("RECORDER_QUEUE_DEPTH", 1024),
            client_queue_depth: env_or("CLIENT_QUEUE_DEPTH", 64),
            line_geometry_change_m: env_or("LINE_GEOMETRY_CHANGE_M", 0.5),
            classifier_hysteresis_ms: env_or("CLASSIFIER_HYSTERESIS_MS", 300),
            slow_client_grace_s: env_or("SLOW_CLIENT_GRACE_S", 2),
        })
    }

    pub fn validate(&self) -> Result<(), crate::error::RelayError> {
        if self.anchor_left_device_id == self.anchor_right_device_id {
            return Err(crate::error::RelayError::Config(
                "anchor_left_device_id and anchor_right_device_id must differ".into(),
            ));
        }
        if !(101..=199).contains(&self.anchor_left_device_id)
            || !(101..=199).contains(&self.anchor_right_device_id)
        {
            return Err(crate::error::RelayError::Config(
                "anchor device ids must be in 101..=199".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_identical_anchor_ids() {
        let mut cfg = RelayConfig {
            position_endpoint: String::new(),
            gate_endpoint: String::new(),
            bind_addr: "0.0.0.0:8000".parse().unwrap(),
            threshold_distance_m: 50.0,
            threshold_time_s: 5.0,
            threshold_stale_s: 3.0,
            heartbeat_interval_s: 5,
            gate_sign_flip: false,
            anchor_left_device_id: 101,
            anchor_right_device_id: 101,
            session_dir: PathBuf::from("."),
            athletes_config: PathBuf::from("."),
            subscriber_queue_depth: 256,
            recorder_queue_depth: 1024,
            client_queue_depth: 64,
            line_geometry_change_m: 0.5,
            classifier_hysteresis_ms: 300,
            slow_client_grace_s: 2,
        };
        assert!(cfg.validate().is_err());
        cfg.anchor_right_device_id = 102;
        assert!(cfg.validate().is_ok());
    }
}
