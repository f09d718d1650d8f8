//! Speed-over-ground / course-over-ground derivation and geodesy helpers.
//!
//! Pure functions over position history — no shared state, no I/O.

use relay_wire::{Kinematics, PositionSample};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
const MPS_TO_KNOTS: f64 = 1.943_84;

const HISTORY_CAPACITY: usize = 10;
const HISTORY_MAX_AGE_US: i64 = 2_000_000;
const JITTER_GAP_US: i64 = 50_000;
const STALE_GAP_US: i64 = 2_000_000;

/// Bounded, age-limited per-athlete position history (spec suggests K=10,
/// max age 2s). Mutated only on the ingestion path.
#[derive(Debug, Clone, Default)]
pub struct PositionHistory {
    samples: Vec<PositionSample>,
}

impl PositionHistory {
    pub fn push(&mut self, sample: PositionSample) {
        self.samples.push(sample);
        let newest_ts = sample.device_ts_us;
        self.samples
            .retain(|s| newest_ts - s.device_ts_us <= HISTORY_MAX_AGE_US);
        if self.samples.len() > HISTORY_CAPACITY {
            let excess = self.samples.len() - HISTORY_CAPACITY;
            self.samples.drain(0..excess);
        }
    }

    pub fn latest(&self) -> Option<&PositionSample> {
        self.samples.last()
    }

    /// Derive kinematics from the two most recent samples, per §4.3. Returns
    /// `None` if there are fewer than two samples or the gap between them is
    /// jitter (<50ms) or a dropout (>2s).
    pub fn derive_kinematics(&self) -> Option<Kinematics> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }
        let prev = &self.samples[n - 2];
        let latest = &self.samples[n - 1];

        if let (Some(ve), Some(vn)) = (latest.vel_e_mps, latest.vel_n_mps) {
            let speed_mps = ve.hypot(vn);
            let cog_deg = normalize_deg(ve.atan2(vn).to_degrees());
            return Some(Kinematics {
                sog_knots: speed_mps * MPS_TO_KNOTS,
                cog_deg,
            });
        }

        let dt_us = latest.device_ts_us - prev.device_ts_us;
        if dt_us < JITTER_GAP_US || dt_us > STALE_GAP_US {
            return None;
        }
        let dt_s = dt_us as f64 / 1_000_000.0;

        let (d_east, d_north) = local_enu_delta(prev.lat, prev.lon, latest.lat, latest.lon);
        let speed_mps = d_east.hypot(d_north) / dt_s;
        let cog_deg = normalize_deg(d_east.atan2(d_north).to_degrees());

        Some(Kinematics {
            sog_knots: speed_mps * MPS_TO_KNOTS,
            cog_deg,
        })
    }
}

fn normalize_deg(deg: f64) -> f64 {
    let m = deg % 360.0;
    if m < 0.0 {
        m + 360.0
    } else {
        m
    }
}

/// Equirectangular local east/north projection of `(to_lat, to_lon)` relative
/// to `(from_lat, from_lon)`, in meters. Valid for short baselines.
pub fn local_enu_delta(from_lat: f64, from_lon: f64, to_lat: f64, to_lon: f64) -> (f64, f64) {
    let d_lat = (to_lat - from_lat).to_radians();
    let d_lon = (to_lon - from_lon).to_radians();
    let d_east = from_lat.to_radians().cos() * d_lon * EARTH_RADIUS_M;
    let d_north = d_lat * EARTH_RADIUS_M;
    (d_east, d_north)
}

/// Great-circle distance in meters between two lat/lon pairs (degrees).
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

/// Initial bearing in degrees [0, 360) from point 1 to point 2.
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    normalize_deg(y.atan2(x).to_degrees())
}
