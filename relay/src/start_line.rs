//! Start-Line Tracker (C6): current line geometry from anchor positions.

use relay_wire::{AnchorPoint, LineQuality, PositionSample, StartLineDefinitionPayload};

use crate::kinematics::haversine_distance_m;

const ANCHOR_FIX_MAX_AGE_MS: i64 = 2_000;
const MIN_GATE_LENGTH_M: f64 = 1.0;
const MAX_GATE_LENGTH_M: f64 = 1000.0;

#[derive(Debug, Clone, Copy)]
struct AnchorFix {
    lat: f64,
    lon: f64,
    last_update_ms: i64,
}

pub struct StartLineTracker {
    left_device_id: u32,
    right_device_id: u32,
    geometry_change_threshold_m: f64,
    left: Option<AnchorFix>,
    right: Option<AnchorFix>,
    last_announced: Option<(f64, f64, f64, f64)>, // left lat/lon, right lat/lon at last announcement
    last_announced_quality: Option<LineQuality>,
}

impl StartLineTracker {
    pub fn new(left_device_id: u32, right_device_id: u32, geometry_change_threshold_m: f64) -> Self {
        Self {
            left_device_id,
            right_device_id,
            geometry_change_threshold_m,
            left: None,
            right: None,
            last_announced: None,
            last_announced_quality: None,
        }
    }

    /// Feed an anchor position update. Returns `Some(payload)` if the
    /// geometry moved enough to warrant a republish.
    pub fn apply_position(
        &mut self,
        sample: &PositionSample,
        now_ms: i64,
    ) -> Option<StartLineDefinitionPayload> {
        if sample.device_id == self.left_device_id {
            self.left = Some(AnchorFix {
                lat: sample.lat,
                lon: sample.lon,
                last_update_ms: now_ms,
            });
        } else if sample.device_id == self.right_device_id {
            self.right = Some(AnchorFix {
                lat: sample.lat,
                lon: sample.lon,
                last_update_ms: now_ms,
            });
        } else {
            return None;
        }

        self.maybe_announce(now_ms)
    }

    fn maybe_announce(&mut self, now_ms: i64) -> Option<StartLineDefinitionPayload> {
        let (left, right) = (self.left?, self.right?);

        let moved = match self.last_announced {
            None => true,
            Some((ll, lo, rl, ro)) => {
                haversine_distance_m(ll, lo, left.lat, left.lon) > self.geometry_change_threshold_m
                    || haversine_distance_m(rl, ro, right.lat, right.lon)
                        > self.geometry_change_threshold_m
            }
        };

        if !moved {
            return None;
        }

        self.last_announced = Some((left.lat, left.lon, right.lat, right.lon));
        let payload = self.build_payload(left, right, now_ms);
        self.last_announced_quality = Some(payload.quality);
        Some(payload)
    }

    /// Re-derive quality without requiring a new position (for the
    /// device-dropout scenario — an anchor going stale must downgrade
    /// `quality` even though geometry hasn't moved).
    pub fn current_quality(&self, now_ms: i64) -> LineQuality {
        match (self.left, self.right) {
            (Some(l), Some(r)) => quality_for(l, r, now_ms),
            _ => LineQuality::Unknown,
        }
    }

    /// Watchdog-cadence check: an anchor can go stale (and `quality`
    /// degrade) with no new position update, so geometry-triggered
    /// `maybe_announce` alone would never notice. Called once per
    /// heartbeat tick; republishes only when the quality verdict itself
    /// has changed since the last announcement.
    pub fn recheck_quality(&mut self, now_ms: i64) -> Option<StartLineDefinitionPayload> {
        let (left, right) = (self.left?, self.right?);
        let quality = quality_for(left, right, now_ms);
        if self.last_announced_quality == Some(quality) {
            return None;
        }
        self.last_announced_quality = Some(quality);
        Some(self.build_payload(left, right, now_ms))
    }

    fn build_payload(
        &self,
        left: AnchorFix,
        right: AnchorFix,
        now_ms: i64,
    ) -> StartLineDefinitionPayload {
        let gate_length_m = haversine_distance_m(left.lat, left.lon, right.lat, right.lon);
        StartLineDefinitionPayload {
            anchor_left: AnchorPoint {
                device_id: self.left_device_id,
                lat: left.lat,
                lon: left.lon,
            },
            anchor_right: AnchorPoint {
                device_id: self.right_device_id,
                lat: right.lat,
                lon: right.lon,
            },
            gate_length_m,
            quality: quality_for(left, right, now_ms),
        }
    }
}

fn quality_for(left: AnchorFix, right: AnchorFix, now_ms: i64) -> LineQuality {
    let both_recent = now_ms - left.last_update_ms <= ANCHOR_FIX_MAX_AGE_MS
        && now_ms - right.last_update_ms <= ANCHOR_FIX_MAX_AGE_MS;
    let gate_length_m = haversine_distance_m(left.lat, left.lon, right.lat, right.lon);
    let length_plausible = (MIN_GATE_LENGTH_M..=MAX_GATE_LENGTH_M).contains(&gate_length_m);

    if both_recent && length_plausible {
        LineQuality::Good
    } else if length_plausible {
        LineQuality::Degraded
    } else {
        LineQuality::Unknown
    }
}
