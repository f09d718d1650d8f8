//! Athlete State Table (C5): per-device merged view, mutated only by the
//! ingest pipeline. Readers get cheap clones of the per-athlete snapshot.

use std::collections::HashMap;

use relay_wire::{AthleteStatus, GateMetric, Kinematics, PositionSample};

use crate::classifier::HysteresisState;
use crate::kinematics::PositionHistory;

#[derive(Debug, Clone)]
pub struct AthleteState {
    pub device_id: u32,
    pub last_position: Option<PositionSample>,
    pub last_gate_metric: Option<GateMetric>,
    pub kinematics: Option<Kinematics>,
    pub status: AthleteStatus,
    pub status_enter_ts_ms: i64,
    pub last_update_ms: i64,
}

/// Internal per-device working state: the public snapshot plus the bits
/// that never leave the ingest task (history buffer, hysteresis bookkeeping).
struct DeviceEntry {
    history: PositionHistory,
    hysteresis: HysteresisState,
    snapshot: AthleteState,
    /// Status held immediately before a STALE transition, so a device that
    /// comes back online is restored to it rather than to SAFE. `None` for
    /// a device that has never gone stale.
    pre_stale_status: Option<AthleteStatus>,
}

/// Keyed map, single writer (the ingest task). Snapshot reads never see a
/// torn per-athlete record because each entry is replaced as a whole.
#[derive(Default)]
pub struct AthleteStateTable {
    entries: HashMap<u32, DeviceEntry>,
}

impl AthleteStateTable {
    pub fn snapshot(&self, device_id: u32) -> Option<AthleteState> {
        self.entries.get(&device_id).map(|e| e.snapshot.clone())
    }

    pub fn all_snapshots(&self) -> Vec<AthleteState> {
        let mut v: Vec<_> = self.entries.values().map(|e| e.snapshot.clone()).collect();
        v.sort_by_key(|s| s.device_id);
        v
    }

    pub fn device_ids(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    fn entry(&mut self, device_id: u32, now_ms: i64) -> &mut DeviceEntry {
        self.entries.entry(device_id).or_insert_with(|| DeviceEntry {
            history: PositionHistory::default(),
            hysteresis: HysteresisState::new(now_ms),
            snapshot: AthleteState {
                device_id,
                last_position: None,
                last_gate_metric: None,
                kinematics: None,
                status: AthleteStatus::Safe,
                status_enter_ts_ms: now_ms,
                last_update_ms: now_ms,
            },
            pre_stale_status: None,
        })
    }

    /// Apply a new position sample: update history, re-derive kinematics,
    /// update last-seen timestamp.
    pub fn apply_position(&mut self, sample: PositionSample, now_ms: i64) {
        let entry = self.entry(sample.device_id, now_ms);
        entry.history.push(sample);
        entry.snapshot.last_position = Some(sample);
        entry.snapshot.kinematics = entry.history.derive_kinematics();
        entry.snapshot.last_update_ms = now_ms;
    }

    /// Apply a gate metric and run the classifier, returning the outcome so
    /// the caller (ingest pipeline) can decide whether to fabricate an event.
    pub fn apply_gate_metric(
        &mut self,
        metric: GateMetric,
        now_ms: i64,
        start_signal_ts_ms: Option<i64>,
        thresholds: ClassifierThresholds,
    ) -> crate::classifier::ClassifyOutcome {
        let entry = self.entry(metric.device_id, now_ms);
        entry.snapshot.last_gate_metric = Some(metric);
        entry.snapshot.last_update_ms = now_ms;

        let input = crate::classifier::ClassifyInput {
            now_ms,
            last_update_ms: entry.snapshot.last_update_ms,
            start_signal_ts_ms,
            crossing_ts_ms: now_ms,
            d_perp_signed_m: metric.d_perp_signed_m,
            eta_s: metric.eta_s,
            speed_to_line_mps: metric.speed_to_line_mps,
            crossing_event: metric.crossing_event,
            threshold_distance_m: thresholds.distance_m,
            threshold_time_s: thresholds.time_s,
            threshold_stale_s: thresholds.stale_s,
            hysteresis_ms: thresholds.hysteresis_ms,
        };

        let outcome = crate::classifier::classify(&mut entry.hysteresis, input);
        entry.snapshot.status = entry.hysteresis.status;
        entry.snapshot.status_enter_ts_ms = entry.hysteresis.status_enter_ts_ms;
        outcome
    }

    /// Re-evaluate staleness for every tracked device on the watchdog tick,
    /// without requiring a new gate metric. Returns devices whose status
    /// just transitioned (for DEVICE_OFFLINE/DEVICE_ONLINE emission by C12).
    ///
    /// A latched CROSSED/OCS status is never overwritten by a dropout: the
    /// crossing latch only clears via an explicit `reset_device`/`reset_all`
    /// (§8 "Crossing latch"). A non-latched device that goes stale has its
    /// pre-stale status remembered and restored on recovery, rather than
    /// being reset to SAFE.
    pub fn sweep_staleness(
        &mut self,
        now_ms: i64,
        stale_after_ms: i64,
    ) -> Vec<(u32, bool)> {
        let mut transitions = Vec::new();
        for (device_id, entry) in self.entries.iter_mut() {
            let is_stale_now = now_ms - entry.snapshot.last_update_ms > stale_after_ms;
            let currently_stale = entry.snapshot.status == AthleteStatus::Stale;
            let latched = matches!(entry.snapshot.status, AthleteStatus::Crossed | AthleteStatus::Ocs);

            if is_stale_now && !currently_stale && !latched {
                entry.pre_stale_status = Some(entry.snapshot.status);
                entry.hysteresis.status = AthleteStatus::Stale;
                entry.hysteresis.status_enter_ts_ms = now_ms;
                entry.snapshot.status = AthleteStatus::Stale;
                transitions.push((*device_id, false));
            } else if !is_stale_now && currently_stale {
                let restored = entry.pre_stale_status.take().unwrap_or(AthleteStatus::Safe);
                entry.hysteresis.status = restored;
                entry.hysteresis.status_enter_ts_ms = now_ms;
                entry.snapshot.status = restored;
                transitions.push((*device_id, true));
            }
        }
        transitions
    }

    /// Reset the latch for one device (operator action / new session).
    pub fn reset_device(&mut self, device_id: u32, now_ms: i64) {
        if let Some(entry) = self.entries.get_mut(&device_id) {
            entry.hysteresis.reset(now_ms);
            entry.snapshot.status = entry.hysteresis.status;
            entry.snapshot.status_enter_ts_ms = entry.hysteresis.status_enter_ts_ms;
            entry.pre_stale_status = None;
        }
    }

    /// Reset every tracked athlete's latch (used when a new session starts).
    pub fn reset_all(&mut self, now_ms: i64) {
        for entry in self.entries.values_mut() {
            entry.pre_stale_status = None;
            entry.hysteresis.reset(now_ms);
            entry.snapshot.status = entry.hysteresis.status;
            entry.snapshot.status_enter_ts_ms = entry.hysteresis.status_enter_ts_ms;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifierThresholds {
    pub distance_m: f64,
    pub time_s: f64,
    pub stale_s: f64,
    pub hysteresis_ms: i64,
}
