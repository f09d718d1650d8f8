//! Shared application state: the Arc-bundle handed to the ingest tasks, the
//! watchdog, and the control surface alike (the same shape as the teacher's
//! `SharedState`/the pack's `AppState` — one struct, one `Arc`, cloned per
//! task rather than re-derived).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use relay_wire::Envelope;

use crate::athlete_state::{AthleteStateTable, ClassifierThresholds};
use crate::broadcaster::Broadcaster;
use crate::config::RelayConfig;
use crate::fabricator::{now_ms, Fabricator};
use crate::parsers::ParseStats;
use crate::recorder::Recorder;
use crate::registry::AthleteRegistry;
use crate::start_line::StartLineTracker;

/// Everything the ingest pipeline, watchdog, and REST/WS surface share.
pub struct AppState {
    pub config: RelayConfig,
    pub registry: AthleteRegistry,
    pub state_table: Mutex<AthleteStateTable>,
    pub start_line: Mutex<StartLineTracker>,
    pub fabricator: Fabricator,
    pub broadcaster: Broadcaster,
    pub recorder: Recorder,

    /// Wall-clock ms the start signal fired, if any (set via
    /// `POST /api/start-signal`). `None` before the gun.
    pub start_signal_ts_ms: Mutex<Option<i64>>,

    pub position_connected: Arc<AtomicBool>,
    pub gate_connected: Arc<AtomicBool>,
    pub messages_relayed: AtomicU64,

    pub position_parse_stats: Mutex<ParseStats>,
    pub gate_parse_stats: Mutex<ParseStats>,

    pub started_at_ms: i64,
}

impl AppState {
    pub fn new(config: RelayConfig, registry: AthleteRegistry) -> Self {
        let start_line = StartLineTracker::new(
            config.anchor_left_device_id,
            config.anchor_right_device_id,
            config.line_geometry_change_m,
        );
        let recorder = Recorder::new(config.session_dir.clone(), config.recorder_queue_depth);
        let broadcaster = Broadcaster::new(
            config.client_queue_depth,
            std::time::Duration::from_secs(config.slow_client_grace_s),
        );

        Self {
            config,
            registry,
            state_table: Mutex::new(AthleteStateTable::default()),
            start_line: Mutex::new(start_line),
            fabricator: Fabricator::default(),
            broadcaster,
            recorder,
            start_signal_ts_ms: Mutex::new(None),
            position_connected: Arc::new(AtomicBool::new(false)),
            gate_connected: Arc::new(AtomicBool::new(false)),
            messages_relayed: AtomicU64::new(0),
            position_parse_stats: Mutex::new(ParseStats::default()),
            gate_parse_stats: Mutex::new(ParseStats::default()),
            started_at_ms: now_ms(),
        }
    }

    pub fn classifier_thresholds(&self) -> ClassifierThresholds {
        ClassifierThresholds {
            distance_m: self.config.threshold_distance_m,
            time_s: self.config.threshold_time_s,
            stale_s: self.config.threshold_stale_s,
            hysteresis_ms: self.config.classifier_hysteresis_ms as i64,
        }
    }

    pub fn start_signal_ts_ms(&self) -> Option<i64> {
        *self.start_signal_ts_ms.lock().unwrap()
    }

    pub fn uptime_s(&self) -> u64 {
        ((now_ms() - self.started_at_ms).max(0) / 1000) as u64
    }

    /// C8's output handoff: every fabricated envelope reaches the
    /// broadcaster (C9) and the recorder (C10) through this single path.
    pub async fn publish(&self, envelope: Envelope) {
        self.broadcaster.publish(&envelope);
        self.recorder.record(&envelope).await;
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
    }
}
