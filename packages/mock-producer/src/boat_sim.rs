//! Boat physics: N athletes approaching the start line in a local east/north
//! (ENU) frame, plus the two line-anchor devices. Adapted from the teacher's
//! boat physics model — tactical slowdown near the line, first-order speed
//! easing, an OCS scenario that gently pushes a boat across — with the
//! antenna lever-arm / quaternion attitude math dropped: this spec's
//! upstream contract is plain lat/lon fixes, not ranged UWB measurements, so
//! there is no lever-arm correction for a producer to simulate.

use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// One simulated athlete device, position in meters east/north of the line
/// origin (the midpoint between the two anchors).
#[derive(Debug, Clone)]
pub struct Boat {
    pub device_id: u32,
    pub x_east_m: f64,
    pub y_north_m: f64,
    pub boat_speed_mps: f64,
    base_speed_mps: f64,
    heading_deg: f64,
    wave_phase: f64,
    /// Latches once this boat has crossed the line, so a crossing event
    /// fires once rather than every tick it stays on the OCS side.
    pub crossed: bool,
    pub forced_ocs: bool,
}

impl Boat {
    fn antenna_to_line_side(&self) -> f64 {
        self.y_north_m
    }
}

pub struct SimConfig {
    pub line_length_m: f64,
    pub n_boats: u32,
    pub first_device_id: u32,
    pub approach_distance_m: f64,
    pub t_minus_seconds: u32,
    pub target_speed_mps: f64,
    pub speed_variance: f64,
    pub tactical_slowdown_y_m: f64,
    pub tactical_slowdown_factor: f64,
    pub wave_amplitude_m: f64,
    pub wave_period_s: f64,
    pub ocs_device_ids: Vec<u32>,
    pub ocs_offset_m: f64,
}

pub struct BoatSim {
    pub boats: Vec<Boat>,
    pub line_length_m: f64,
    pub t_elapsed_s: f64,
    pub t_to_gun_s: f64,

    wave_amplitude: f64,
    wave_period: f64,
    tactical_slowdown_y: f64,
    tactical_slowdown_factor: f64,
    ocs_offset: f64,
}

impl BoatSim {
    pub fn new(cfg: &SimConfig) -> Self {
        let boats = Self::spawn_boats(cfg);
        Self {
            boats,
            line_length_m: cfg.line_length_m,
            t_elapsed_s: 0.0,
            t_to_gun_s: cfg.t_minus_seconds as f64,
            wave_amplitude: cfg.wave_amplitude_m,
            wave_period: cfg.wave_period_s,
            tactical_slowdown_y: cfg.tactical_slowdown_y_m,
            tactical_slowdown_factor: cfg.tactical_slowdown_factor,
            ocs_offset: cfg.ocs_offset_m,
        }
    }

    fn spawn_boats(cfg: &SimConfig) -> Vec<Boat> {
        let mut rng = rand::thread_rng();
        let speed_dist = Uniform::new(
            cfg.target_speed_mps - cfg.speed_variance / 2.0,
            cfg.target_speed_mps + cfg.speed_variance / 2.0,
        );
        let x_spread = cfg.line_length_m * 0.9;

        (0..cfg.n_boats)
            .map(|i| {
                let device_id = cfg.first_device_id + i;
                let base_speed = speed_dist.sample(&mut rng);
                let x = -x_spread / 2.0
                    + (i as f64 / f64::max(cfg.n_boats as f64 - 1.0, 1.0)) * x_spread;
                let y = -cfg.approach_distance_m + rng.gen_range(-20.0..20.0);
                Boat {
                    device_id,
                    x_east_m: x,
                    y_north_m: y,
                    boat_speed_mps: base_speed,
                    base_speed_mps: base_speed,
                    heading_deg: rng.gen_range(350.0..370.0) % 360.0,
                    wave_phase: rng.gen_range(0.0..std::f64::consts::TAU),
                    crossed: false,
                    forced_ocs: cfg.ocs_device_ids.contains(&device_id),
                }
            })
            .collect()
    }

    /// Advance the simulation by `dt` seconds (never panics — §8 invariant
    /// "zero interruption" on the teacher side, carried over here).
    pub fn tick(&mut self, dt: f64) {
        self.t_elapsed_s += dt;
        self.t_to_gun_s = f64::max(self.t_to_gun_s - dt, -60.0);

        let angle = std::f64::consts::TAU / self.wave_period.max(0.1);
        let ocs_window = self.t_to_gun_s <= 0.0 && self.t_to_gun_s >= -10.0;

        for boat in &mut self.boats {
            let target_speed = if boat.y_north_m > -self.tactical_slowdown_y {
                boat.base_speed_mps * self.tactical_slowdown_factor
            } else {
                boat.base_speed_mps
            };

            let actual_speed = if ocs_window && boat.forced_ocs {
                let dtl = boat.antenna_to_line_side();
                if dtl < self.ocs_offset {
                    boat.base_speed_mps * 0.5
                } else {
                    0.0
                }
            } else {
                target_speed
            };

            boat.boat_speed_mps += (actual_speed - boat.boat_speed_mps) * (dt * 2.0).min(1.0);

            let hdg_rad = boat.heading_deg.to_radians();
            boat.x_east_m += boat.boat_speed_mps * hdg_rad.sin() * dt;
            boat.y_north_m += boat.boat_speed_mps * hdg_rad.cos() * dt;

            if !boat.crossed && boat.antenna_to_line_side() >= 0.0 {
                boat.crossed = true;
            }
        }
    }

    pub fn wave_alt_m(&self, boat: &Boat) -> f64 {
        let angle = std::f64::consts::TAU / self.wave_period.max(0.1);
        self.wave_amplitude * (angle * self.t_elapsed_s + boat.wave_phase).sin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SimConfig {
        SimConfig {
            line_length_m: 120.0,
            n_boats: 4,
            first_device_id: 1,
            approach_distance_m: 200.0,
            t_minus_seconds: 30,
            target_speed_mps: 3.0,
            speed_variance: 0.5,
            tactical_slowdown_y_m: 30.0,
            tactical_slowdown_factor: 0.6,
            wave_amplitude_m: 0.3,
            wave_period_s: 6.0,
            ocs_device_ids: vec![2],
            ocs_offset_m: 0.15,
        }
    }

    #[test]
    fn spawns_requested_boat_count_with_sequential_device_ids() {
        let sim = BoatSim::new(&cfg());
        assert_eq!(sim.boats.len(), 4);
        assert_eq!(sim.boats[0].device_id, 1);
        assert_eq!(sim.boats[3].device_id, 4);
    }

    #[test]
    fn ticking_moves_boats_north_toward_the_line() {
        let mut sim = BoatSim::new(&cfg());
        let start_y = sim.boats[0].y_north_m;
        for _ in 0..50 {
            sim.tick(0.1);
        }
        assert!(sim.boats[0].y_north_m > start_y);
    }

    #[test]
    fn forced_ocs_boat_eventually_crosses_at_the_gun() {
        let mut c = cfg();
        c.t_minus_seconds = 1;
        c.approach_distance_m = 1.0;
        let mut sim = BoatSim::new(&c);
        sim.boats[1].y_north_m = -0.5;
        for _ in 0..200 {
            sim.tick(0.1);
        }
        assert!(sim.boats[1].crossed);
    }

    #[test]
    fn never_panics_across_a_long_run() {
        let mut sim = BoatSim::new(&cfg());
        for _ in 0..10_000 {
            sim.tick(0.05);
        }
    }
}
