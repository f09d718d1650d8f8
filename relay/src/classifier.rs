//! Status classifier (C4): priority-ordered classification with 300ms
//! hysteresis and latching of CROSSED/OCS per spec §4.4.

use relay_wire::{AthleteStatus, CrossingEvent};

/// Per-athlete hysteresis bookkeeping, held in `AthleteState`.
#[derive(Debug, Clone)]
pub struct HysteresisState {
    pub status: AthleteStatus,
    pub status_enter_ts_ms: i64,
    candidate: Option<(AthleteStatus, i64)>,
}

impl HysteresisState {
    pub fn new(now_ms: i64) -> Self {
        Self {
            status: AthleteStatus::Safe,
            status_enter_ts_ms: now_ms,
            candidate: None,
        }
    }

    /// Explicit reset (new session, operator action). Clears the latch.
    pub fn reset(&mut self, now_ms: i64) {
        self.status = AthleteStatus::Safe;
        self.status_enter_ts_ms = now_ms;
        self.candidate = None;
    }
}

pub struct ClassifyInput {
    pub now_ms: i64,
    pub last_update_ms: i64,
    pub start_signal_ts_ms: Option<i64>,
    /// Wall-clock ts of the crossing event itself (the gate-metric's arrival
    /// time); compared against `start_signal_ts_ms` for the OCS rule.
    pub crossing_ts_ms: i64,
    pub d_perp_signed_m: f64,
    pub eta_s: Option<f64>,
    pub speed_to_line_mps: Option<f64>,
    pub crossing_event: CrossingEvent,
    pub threshold_distance_m: f64,
    pub threshold_time_s: f64,
    pub threshold_stale_s: f64,
    pub hysteresis_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyOutcome {
    pub status: AthleteStatus,
    pub changed: bool,
    /// First-ever transition into CROSSED this session: emit a CROSSING event.
    pub crossing_event_to_emit: bool,
    /// First-ever transition into OCS this session: emit an OCS event.
    pub ocs_event_to_emit: bool,
}

fn unchanged(status: AthleteStatus) -> ClassifyOutcome {
    ClassifyOutcome {
        status,
        changed: false,
        crossing_event_to_emit: false,
        ocs_event_to_emit: false,
    }
}

/// Priority-ordered candidate determination (§4.4, steps 1-5). A pure
/// function: no hidden state, testable directly.
pub fn determine_candidate(previous_status: AthleteStatus, input: &ClassifyInput) -> AthleteStatus {
    let stale_after_ms = (input.threshold_stale_s * 1000.0) as i64;
    if input.now_ms - input.last_update_ms > stale_after_ms {
        return AthleteStatus::Stale;
    }

    let already_crossed = matches!(previous_status, AthleteStatus::Crossed | AthleteStatus::Ocs);
    if input.crossing_event != CrossingEvent::NoCrossing || already_crossed {
        if let Some(start_ts) = input.start_signal_ts_ms {
            if input.crossing_ts_ms < start_ts {
                return AthleteStatus::Ocs;
            }
        }
        return AthleteStatus::Crossed;
    }

    let moving_toward = input.speed_to_line_mps.map(|s| s > 0.0).unwrap_or(false);

    if input.start_signal_ts_ms.is_some() {
        if let Some(eta) = input.eta_s {
            if eta <= input.threshold_time_s && moving_toward {
                return AthleteStatus::Risk;
            }
        }
    }

    if input.d_perp_signed_m.abs() <= input.threshold_distance_m && moving_toward {
        return AthleteStatus::Approaching;
    }

    AthleteStatus::Safe
}

/// Run one classification tick, applying hysteresis and latching.
pub fn classify(state: &mut HysteresisState, input: ClassifyInput) -> ClassifyOutcome {
    // Latched: CROSSED/OCS never regress without an explicit reset.
    if matches!(state.status, AthleteStatus::Crossed | AthleteStatus::Ocs) {
        return unchanged(state.status);
    }

    let candidate = determine_candidate(state.status, &input);

    if candidate == state.status {
        state.candidate = None;
        return unchanged(state.status);
    }

    let immediate = matches!(
        candidate,
        AthleteStatus::Crossed | AthleteStatus::Ocs | AthleteStatus::Stale
    );

    if immediate {
        state.status = candidate;
        state.status_enter_ts_ms = input.now_ms;
        state.candidate = None;
        return ClassifyOutcome {
            status: candidate,
            changed: true,
            crossing_event_to_emit: candidate == AthleteStatus::Crossed,
            ocs_event_to_emit: candidate == AthleteStatus::Ocs,
        };
    }

    match state.candidate {
        Some((c, first_seen_ms)) if c == candidate => {
            if input.now_ms - first_seen_ms >= input.hysteresis_ms {
                state.status = candidate;
                state.status_enter_ts_ms = input.now_ms;
                state.candidate = None;
                ClassifyOutcome {
                    status: candidate,
                    changed: true,
                    crossing_event_to_emit: false,
                    ocs_event_to_emit: false,
                }
            } else {
                unchanged(state.status)
            }
        }
        _ => {
            state.candidate = Some((candidate, input.now_ms));
            unchanged(state.status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input(now_ms: i64) -> ClassifyInput {
        ClassifyInput {
            now_ms,
            last_update_ms: now_ms,
            start_signal_ts_ms: None,
            crossing_ts_ms: now_ms,
            d_perp_signed_m: 200.0,
            eta_s: None,
            speed_to_line_mps: None,
            crossing_event: CrossingEvent::NoCrossing,
            threshold_distance_m: 50.0,
            threshold_time_s: 5.0,
            threshold_stale_s: 3.0,
            hysteresis_ms: 300,
        }
    }

    #[test]
    fn starts_safe_and_stays_safe_when_far_away() {
        let mut state = HysteresisState::new(0);
        let out = classify(&mut state, base_input(0));
        assert_eq!(out.status, AthleteStatus::Safe);
        assert!(!out.changed);
    }

    #[test]
    fn stale_transition_is_immediate_without_hysteresis() {
        let mut state = HysteresisState::new(0);
        let mut input = base_input(4000);
        input.last_update_ms = 0;
        let out = classify(&mut state, input);
        assert_eq!(out.status, AthleteStatus::Stale);
        assert!(out.changed);
    }

    #[test]
    fn approaching_requires_hysteresis_window_before_transition() {
        let mut state = HysteresisState::new(0);
        let mut input = base_input(100);
        input.d_perp_signed_m = 10.0;
        input.speed_to_line_mps = Some(1.0);

        let out1 = classify(&mut state, input.clone_at(150));
        assert!(!out1.changed, "must not transition before hysteresis window elapses");

        let out2 = classify(&mut state, input.clone_at(500));
        assert!(out2.changed);
        assert_eq!(out2.status, AthleteStatus::Approaching);
    }

    #[test]
    fn crossing_without_start_signal_yields_crossed_immediately() {
        let mut state = HysteresisState::new(0);
        let mut input = base_input(100);
        input.crossing_event = CrossingEvent::CrossingLeft;
        let out = classify(&mut state, input);
        assert!(out.changed);
        assert_eq!(out.status, AthleteStatus::Crossed);
        assert!(out.crossing_event_to_emit);
    }

    #[test]
    fn crossing_before_start_signal_yields_ocs() {
        let mut state = HysteresisState::new(0);
        let mut input = base_input(19_500);
        input.crossing_event = CrossingEvent::CrossingLeft;
        input.crossing_ts_ms = 19_500;
        input.start_signal_ts_ms = Some(20_000);
        let out = classify(&mut state, input);
        assert!(out.changed);
        assert_eq!(out.status, AthleteStatus::Ocs);
        assert!(out.ocs_event_to_emit);
    }

    #[test]
    fn ocs_is_latched_and_future_ticks_never_regress() {
        let mut state = HysteresisState::new(0);
        let mut input = base_input(19_500);
        input.crossing_event = CrossingEvent::CrossingLeft;
        input.crossing_ts_ms = 19_500;
        input.start_signal_ts_ms = Some(20_000);
        classify(&mut state, input);
        assert_eq!(state.status, AthleteStatus::Ocs);

        // A later, perfectly ordinary gate metric should not change anything.
        let mut later = base_input(25_000);
        later.start_signal_ts_ms = Some(20_000);
        later.d_perp_signed_m = 5.0;
        later.speed_to_line_mps = Some(-1.0); // moving away
        let out = classify(&mut state, later);
        assert!(!out.changed);
        assert_eq!(out.status, AthleteStatus::Ocs);
    }

    #[test]
    fn idempotent_repeat_metric_emits_no_duplicate_transition() {
        let mut state = HysteresisState::new(0);
        let mut input = base_input(100);
        input.crossing_event = CrossingEvent::CrossingLeft;
        let out1 = classify(&mut state, input.clone_at(100));
        assert!(out1.changed && out1.crossing_event_to_emit);
        let out2 = classify(&mut state, input.clone_at(200));
        assert!(!out2.changed);
        assert!(!out2.crossing_event_to_emit);
    }

    #[test]
    fn risk_requires_start_signal_eta_and_closing_speed() {
        let mut state = HysteresisState::new(0);
        let mut input = base_input(1000);
        input.start_signal_ts_ms = Some(500);
        input.eta_s = Some(3.0);
        input.speed_to_line_mps = Some(2.0);
        input.d_perp_signed_m = 80.0; // outside approaching radius but within risk eta
        classify(&mut state, input.clone_at(1000));
        let out = classify(&mut state, input.clone_at(1400));
        assert_eq!(out.status, AthleteStatus::Risk);
    }

    #[test]
    fn reset_clears_the_latch() {
        let mut state = HysteresisState::new(0);
        state.status = AthleteStatus::Ocs;
        state.reset(1000);
        assert_eq!(state.status, AthleteStatus::Safe);
    }

    impl ClassifyInput {
        fn clone_at(&self, now_ms: i64) -> Self {
            Self {
                now_ms,
                last_update_ms: now_ms,
                ..self.clone_shallow()
            }
        }

        fn clone_shallow(&self) -> Self {
            ClassifyInput {
                now_ms: self.now_ms,
                last_update_ms: self.last_update_ms,
                start_signal_ts_ms: self.start_signal_ts_ms,
                crossing_ts_ms: self.crossing_ts_ms,
                d_perp_signed_m: self.d_perp_signed_m,
                eta_s: self.eta_s,
                speed_to_line_mps: self.speed_to_line_mps,
                crossing_event: self.crossing_event,
                threshold_distance_m: self.threshold_distance_m,
                threshold_time_s: self.threshold_time_s,
                threshold_stale_s: self.threshold_stale_s,
                hysteresis_ms: self.hysteresis_ms,
            }
        }
    }
}
