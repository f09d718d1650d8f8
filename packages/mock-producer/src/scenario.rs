//! Injectable fault scenarios, trimmed from the teacher's `ScenarioType`/
//! `ScenarioConfig` pair down to the concrete end-to-end scenarios this
//! contract's consumers actually exercise (the UWB-specific presets —
//! NLOS rate, clock slip, mark drift, committee dropout — have no
//! counterpart here: this producer has no ranging layer to perturb).

use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// No faults: steady position/gate frames from T-minus to well past the gun.
    Clean,
    /// One or more boats are pushed across the line at T-0 (`--ocs-device-ids`).
    Ocs,
    /// Randomly drop outgoing frames and add jitter to the send cadence.
    PacketLossJitter,
    /// Periodically silence one device's frames entirely for a few seconds.
    DeviceDropout,
}

/// Decides whether this tick's frame for `device_id` should be sent, given
/// the active scenario. Deterministic-ish via `rand` the same way the
/// teacher's `ScenarioConfig::is_node_dropped` gates on an epoch counter
/// rather than a pure coin flip, so dropout has visible, testable structure.
pub fn should_emit(
    scenario: Scenario,
    device_id: u32,
    dropout_device_id: Option<u32>,
    epoch: u64,
) -> bool {
    match scenario {
        Scenario::DeviceDropout => {
            if dropout_device_id != Some(device_id) {
                return true;
            }
            // Drop for 3 epochs out of every 13, mirroring the teacher's
            // `epoch_counter % (duration + 10) < duration` gate.
            epoch % 13 >= 3
        }
        Scenario::PacketLossJitter => {
            let mut rng = rand::thread_rng();
            rand::Rng::gen_bool(&mut rng, 0.9)
        }
        _ => true,
    }
}

/// Extra jitter to sleep before the next tick, beyond the nominal cadence.
/// Only `PacketLossJitter` perturbs timing; other scenarios are on-cadence.
pub fn jitter_delay_ms(scenario: Scenario) -> u64 {
    if scenario == Scenario::PacketLossJitter {
        rand::Rng::gen_range(&mut rand::thread_rng(), 0..40)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_scenario_always_emits() {
        for epoch in 0..20 {
            assert!(should_emit(Scenario::Clean, 5, None, epoch));
        }
    }

    #[test]
    fn device_dropout_silences_only_the_targeted_device() {
        let targeted = (0..13).filter(|&e| !should_emit(Scenario::DeviceDropout, 7, Some(7), e)).count();
        assert!(targeted > 0);
        for epoch in 0..13 {
            assert!(should_emit(Scenario::DeviceDropout, 8, Some(7), epoch));
        }
    }
}
