//! `generate` subcommand: synthetic boats driven by `boat_sim`, served over
//! the same length-delimited TCP wire the relay's subscribers dial into.

use std::sync::Arc;
use std::time::Duration;

use relay_wire::{CrossingEvent, PositionQuality};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::boat_sim::{BoatSim, SimConfig};
use crate::geo::enu_to_latlon;
use crate::scenario::{self, Scenario};
use crate::transport::{serve_listener, FrameBroadcaster};
use crate::upstream::{gate_frame, position_frame, GateEntry, PositionEntry};

pub struct GenerateConfig {
    pub position_addr: String,
    pub gate_addr: String,
    pub n_boats: u32,
    pub first_device_id: u32,
    pub anchor_left_device_id: u32,
    pub anchor_right_device_id: u32,
    pub rate_hz: f64,
    pub speed: f64,
    pub line_length_m: f64,
    pub approach_distance_m: f64,
    pub t_minus_seconds: u32,
    pub ocs_device_ids: Vec<u32>,
    pub dropout_device_id: Option<u32>,
    pub scenario: Scenario,
    pub origin_lat: f64,
    pub origin_lon: f64,
}

pub async fn run(cfg: GenerateConfig, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let position_listener = TcpListener::bind(&cfg.position_addr).await?;
    let gate_listener = TcpListener::bind(&cfg.gate_addr).await?;
    info!(position_addr = %cfg.position_addr, gate_addr = %cfg.gate_addr, "mock producer listening");

    let shutdown_rx = shutdown.clone();
    let position_bc = Arc::new(FrameBroadcaster::new(64));
    let gate_bc = Arc::new(FrameBroadcaster::new(64));

    let position_task = tokio::spawn(serve_listener(
        "position",
        position_listener,
        position_bc.clone(),
        shutdown_rx.clone(),
    ));
    let gate_task = tokio::spawn(serve_listener(
        "gate",
        gate_listener,
        gate_bc.clone(),
        shutdown_rx.clone(),
    ));

    let sim_cfg = SimConfig {
        line_length_m: cfg.line_length_m,
        n_boats: cfg.n_boats,
        first_device_id: cfg.first_device_id,
        approach_distance_m: cfg.approach_distance_m,
        t_minus_seconds: cfg.t_minus_seconds,
        target_speed_mps: 3.0,
        speed_variance: 0.6,
        tactical_slowdown_y_m: cfg.approach_distance_m * 0.15,
        tactical_slowdown_factor: 0.55,
        wave_amplitude_m: 0.3,
        wave_period_s: 6.0,
        ocs_device_ids: cfg.ocs_device_ids.clone(),
        ocs_offset_m: 0.15,
    };
    let mut sim = BoatSim::new(&sim_cfg);

    let tick_period = Duration::from_secs_f64((1.0 / cfg.rate_hz.max(0.1)).max(0.001));
    let mut ticker = tokio::time::interval(tick_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let anchor_left = (
        cfg.anchor_left_device_id,
        -cfg.line_length_m / 2.0,
        0.0_f64,
    );
    let anchor_right = (cfg.anchor_right_device_id, cfg.line_length_m / 2.0, 0.0_f64);

    let mut epoch: u64 = 0;
    info!(
        boats = cfg.n_boats,
        scenario = ?cfg.scenario,
        "sim loop starting"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }
        epoch += 1;

        let dt = tick_period.as_secs_f64() * cfg.speed;
        sim.tick(dt);

        if let Some(extra) = Some(scenario::jitter_delay_ms(cfg.scenario)).filter(|ms| *ms > 0) {
            tokio::time::sleep(Duration::from_millis(extra)).await;
        }

        let now_us = now_micros();

        let mut positions = Vec::with_capacity(sim.boats.len() + 2);
        for &(device_id, x, y) in &[anchor_left, anchor_right] {
            let (lat, lon) = enu_to_latlon(cfg.origin_lat, cfg.origin_lon, x, y);
            positions.push(PositionEntry {
                device_id,
                lat,
                lon,
                alt_m: 0.0,
                source_mask: 0b111,
                device_ts_us: now_us,
            });
        }

        let mut gate_entries = Vec::with_capacity(sim.boats.len());
        for boat in &sim.boats {
            if !scenario::should_emit(cfg.scenario, boat.device_id, cfg.dropout_device_id, epoch) {
                continue;
            }

            let alt_m = sim.wave_alt_m(boat);
            let (lat, lon) = enu_to_latlon(cfg.origin_lat, cfg.origin_lon, boat.x_east_m, boat.y_north_m);
            positions.push(PositionEntry {
                device_id: boat.device_id,
                lat,
                lon,
                alt_m,
                source_mask: 0b111,
                device_ts_us: now_us,
            });

            let approaching = boat.y_north_m < 0.0 && boat.boat_speed_mps > 0.01;
            let eta_s = approaching.then(|| (-boat.y_north_m) / boat.boat_speed_mps);
            let crossing_event = if boat.crossed {
                if boat.x_east_m >= 0.0 {
                    CrossingEvent::CrossingRight
                } else {
                    CrossingEvent::CrossingLeft
                }
            } else {
                CrossingEvent::NoCrossing
            };

            // s_along is fractional across the gate segment (0 at the left
            // anchor, 1 at the right), not a raw east-offset in meters.
            let s_along = (boat.x_east_m + cfg.line_length_m / 2.0) / cfg.line_length_m;

            gate_entries.push(GateEntry {
                device_id: boat.device_id,
                d_perp_signed_m: boat.y_north_m,
                s_along,
                eta_s,
                speed_to_line_mps: Some(boat.boat_speed_mps),
                gate_length_m: cfg.line_length_m,
                crossing_event,
                crossing_confidence: 0.92,
                position_quality: PositionQuality::Good,
            });
        }

        position_bc.send(position_frame(now_us, &positions));
        gate_bc.send(gate_frame(now_us, &gate_entries));

        if epoch % 50 == 0 {
            info!(
                epoch,
                t_to_gun_s = sim.t_to_gun_s,
                boats = sim.boats.len(),
                "tick"
            );
        }
    }

    position_task.abort();
    gate_task.abort();
    Ok(())
}

fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
