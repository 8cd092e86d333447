use tracing::info;

use crate::altitude::AltitudeEstimator;
use crate::config::FlightConfig;
use crate::sensors::SensorSample;

/// Flight phases in mission order. The numeric values go into the flight
/// record and must stay in step with the ground tooling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FlightPhase {
    PreFlight = 0,
    Ascent = 1,
    ParachuteDeploy = 2,
    Descent = 3,
    Shutdown = 4,
}

impl FlightPhase {
    pub fn name(&self) -> &'static str {
        match self {
            FlightPhase::PreFlight => "PreFlight",
            FlightPhase::Ascent => "Ascent",
            FlightPhase::ParachuteDeploy => "ParachuteDeploy",
            FlightPhase::Descent => "Descent",
            FlightPhase::Shutdown => "Shutdown",
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Why the machine reached `Shutdown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownCause {
    Landed,
    Timeout,
    ManualAbort,
}

/// Watches the smoothed altitude for the top of the flight. Only a new
/// peak clears the drop counter; dips smaller than the threshold neither
/// count nor reset, which rides out the wobble right at apogee.
pub struct ApogeeDetector {
    max_altitude_m: f32,
    drop_samples: u32,
}

impl ApogeeDetector {
    fn new(entry_altitude_m: f32) -> Self {
        ApogeeDetector {
            max_altitude_m: entry_altitude_m,
            drop_samples: 0,
        }
    }

    fn observe(&mut self, altitude_m: f32, config: &FlightConfig) -> bool {
        if altitude_m > self.max_altitude_m {
            self.max_altitude_m = altitude_m;
            self.drop_samples = 0;
            return false;
        }
        if self.max_altitude_m - altitude_m >= config.apogee_drop_m {
            self.drop_samples += 1;
            return self.drop_samples >= config.apogee_drop_samples;
        }
        false
    }
}

/// Keeps the parachute line asserted for the configured hold.
pub struct DeploymentTimer {
    start_ms: u32,
}

impl DeploymentTimer {
    fn expired(&self, now_ms: u32, config: &FlightConfig) -> bool {
        now_ms.saturating_sub(self.start_ms) >= config.deploy_hold_ms
    }
}

/// Decides touchdown. The opening transient is waited out, then the
/// altitude must hold still across consecutive ticks with the airframe
/// near one g. The hard timeout closes the mission out regardless, and a
/// manual abort wins over everything, ignore window included.
pub struct DescentTracker {
    entry_ms: u32,
    previous_altitude_m: f32,
    stable_samples: u32,
}

impl DescentTracker {
    fn observe(
        &mut self,
        altitude_m: f32,
        accel_g: f32,
        now_ms: u32,
        abort: bool,
        config: &FlightConfig,
    ) -> bool {
        if abort {
            return true;
        }
        let elapsed = now_ms.saturating_sub(self.entry_ms);
        if elapsed < config.descent_ignore_ms {
            self.previous_altitude_m = altitude_m;
            return false;
        }
        if elapsed > config.descent_max_ms {
            return true;
        }
        if (altitude_m - self.previous_altitude_m).abs() < config.landing_delta_m {
            self.stable_samples += 1;
        } else {
            self.stable_samples = 0;
        }
        self.previous_altitude_m = altitude_m;
        self.stable_samples > config.landing_stable_samples && accel_g < config.landing_accel_g
    }

    fn timed_out(&self, now_ms: u32, config: &FlightConfig) -> bool {
        now_ms.saturating_sub(self.entry_ms) > config.descent_max_ms
    }
}

enum PhaseState {
    PreFlight,
    Ascent(ApogeeDetector),
    ParachuteDeploy(DeploymentTimer),
    Descent(DescentTracker),
    Shutdown,
}

impl PhaseState {
    fn phase(&self) -> FlightPhase {
        match self {
            PhaseState::PreFlight => FlightPhase::PreFlight,
            PhaseState::Ascent(_) => FlightPhase::Ascent,
            PhaseState::ParachuteDeploy(_) => FlightPhase::ParachuteDeploy,
            PhaseState::Descent(_) => FlightPhase::Descent,
            PhaseState::Shutdown => FlightPhase::Shutdown,
        }
    }
}

/// What one tick decided: the phase now in force, the level the parachute
/// line must carry, and the altitude that drove it.
pub struct TickDecision {
    pub phase: FlightPhase,
    pub transitioned: bool,
    pub parachute_line: bool,
    pub altitude_m: f32,
}

/// The mission state machine. Phases only ever move forward, each one
/// carries its own tracker, and all timing comes from sample timestamps;
/// the machine keeps no clock of its own.
pub struct FlightStateMachine {
    config: FlightConfig,
    estimator: AltitudeEstimator,
    state: PhaseState,
    armed_at_ms: u32,
    peak_altitude_m: f32,
    deployed_at_ms: Option<u32>,
    shutdown_cause: Option<ShutdownCause>,
}

impl FlightStateMachine {
    /// The only constructor. Arming captures the reference pressure from a
    /// ground sample, so no altitude can be computed before one exists.
    pub fn arm(config: FlightConfig, ground_pressure_hpa: f32, armed_at_ms: u32) -> Self {
        let estimator = AltitudeEstimator::new(ground_pressure_hpa, config.smoothing);
        FlightStateMachine {
            config,
            estimator,
            state: PhaseState::PreFlight,
            armed_at_ms,
            peak_altitude_m: 0.0,
            deployed_at_ms: None,
            shutdown_cause: None,
        }
    }

    /// Advances one tick. The estimator holds still before launch so pad
    /// noise cannot walk the baseline, and after shutdown nothing moves.
    pub fn update(&mut self, sample: &SensorSample, abort_requested: bool) -> TickDecision {
        let altitude_m = match self.state {
            PhaseState::PreFlight | PhaseState::Shutdown => self.estimator.altitude_m(),
            _ => self.estimator.update(sample.pressure_hpa),
        };
        if !matches!(self.state, PhaseState::PreFlight) {
            self.peak_altitude_m = self.peak_altitude_m.max(altitude_m);
        }

        let accel_g = sample.acceleration_g();
        let now_ms = sample.timestamp_ms;

        let mut parachute_line = matches!(self.state, PhaseState::ParachuteDeploy(_));
        let mut next: Option<PhaseState> = None;

        match &mut self.state {
            PhaseState::PreFlight => {
                if accel_g > self.config.launch_accel_g {
                    next = Some(PhaseState::Ascent(ApogeeDetector::new(altitude_m)));
                }
            }
            PhaseState::Ascent(detector) => {
                if detector.observe(altitude_m, &self.config) {
                    // The line goes up on the tick apogee is called.
                    self.deployed_at_ms = Some(now_ms);
                    parachute_line = true;
                    next = Some(PhaseState::ParachuteDeploy(DeploymentTimer {
                        start_ms: now_ms,
                    }));
                }
            }
            PhaseState::ParachuteDeploy(timer) => {
                if timer.expired(now_ms, &self.config) {
                    // The exit tick drops the line and seeds the descent
                    // baseline from the current estimate.
                    parachute_line = false;
                    next = Some(PhaseState::Descent(DescentTracker {
                        entry_ms: now_ms,
                        previous_altitude_m: altitude_m,
                        stable_samples: 0,
                    }));
                }
            }
            PhaseState::Descent(tracker) => {
                if tracker.observe(altitude_m, accel_g, now_ms, abort_requested, &self.config) {
                    self.shutdown_cause = Some(if abort_requested {
                        ShutdownCause::ManualAbort
                    } else if tracker.timed_out(now_ms, &self.config) {
                        ShutdownCause::Timeout
                    } else {
                        ShutdownCause::Landed
                    });
                    next = Some(PhaseState::Shutdown);
                }
            }
            PhaseState::Shutdown => {}
        }

        let transitioned = next.is_some();
        if let Some(next) = next {
            info!(
                "phase transition: {} -> {} at t={} ms, alt={:.1} m",
                self.state.phase().name(),
                next.phase().name(),
                now_ms,
                altitude_m
            );
            self.state = next;
        }

        TickDecision {
            phase: self.state.phase(),
            transitioned,
            parachute_line,
            altitude_m,
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.state.phase()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PhaseState::Shutdown)
    }

    pub fn armed_at_ms(&self) -> u32 {
        self.armed_at_ms
    }

    pub fn peak_altitude_m(&self) -> f32 {
        self.peak_altitude_m
    }

    pub fn deployed_at_ms(&self) -> Option<u32> {
        self.deployed_at_ms
    }

    pub fn shutdown_cause(&self) -> Option<ShutdownCause> {
        self.shutdown_cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp_ms: u32, accel_g: f32, pressure_hpa: f32) -> SensorSample {
        SensorSample {
            timestamp_ms,
            acceleration: [0.0, 0.0, accel_g],
            rotation: [0.0; 3],
            pressure_hpa,
            temperature_c: 20.0,
        }
    }

    fn pressure_at(altitude_m: f32) -> f32 {
        1013.25 * (1.0 - altitude_m / 44330.0).powf(1.0 / 0.1903)
    }

    /// Raw filter makes machine runs deterministic in altitude.
    fn test_config() -> FlightConfig {
        FlightConfig {
            smoothing: 0.0,
            ..FlightConfig::default()
        }
    }

    fn armed() -> FlightStateMachine {
        FlightStateMachine::arm(test_config(), 1013.25, 0)
    }

    #[test]
    fn holds_preflight_below_the_launch_threshold() {
        let mut sm = armed();
        for i in 1..200 {
            let d = sm.update(&sample(i * 10, 1.0, pressure_at(0.0)), false);
            assert_eq!(d.phase, FlightPhase::PreFlight);
            assert!(!d.parachute_line);
        }
    }

    #[test]
    fn launches_on_a_single_high_accel_tick() {
        let mut sm = armed();
        sm.update(&sample(10, 1.0, pressure_at(0.0)), false);
        let d = sm.update(&sample(20, 2.0, pressure_at(0.0)), false);
        assert_eq!(d.phase, FlightPhase::Ascent);
        assert!(d.transitioned);
    }

    #[test]
    fn estimator_holds_still_before_launch() {
        let mut sm = armed();
        // Pressure swings on the pad must not move the altitude estimate.
        for (i, p) in [1000.0, 1020.0, 980.0, 1013.25].iter().enumerate() {
            let d = sm.update(&sample((i as u32 + 1) * 10, 1.0, *p), false);
            assert_eq!(d.altitude_m, 0.0);
        }
    }

    #[test]
    fn max_altitude_never_decreases_during_ascent() {
        let mut det = ApogeeDetector::new(0.0);
        let cfg = FlightConfig::default();
        let mut prev_max = det.max_altitude_m;
        for alt in [5.0, 12.0, 11.5, 13.0, 12.2, 12.9, 20.0, 19.0] {
            det.observe(alt, &cfg);
            assert!(det.max_altitude_m >= prev_max);
            prev_max = det.max_altitude_m;
        }
        assert_eq!(prev_max, 20.0);
    }

    #[test]
    fn apogee_fires_on_the_fifth_consecutive_drop() {
        let mut det = ApogeeDetector::new(0.0);
        let cfg = FlightConfig::default();
        assert!(!det.observe(100.0, &cfg));
        for _ in 0..4 {
            assert!(!det.observe(98.8, &cfg));
        }
        assert!(det.observe(98.8, &cfg));
    }

    #[test]
    fn a_new_peak_clears_the_drop_count() {
        let mut det = ApogeeDetector::new(0.0);
        let cfg = FlightConfig::default();
        det.observe(100.0, &cfg);
        for _ in 0..4 {
            assert!(!det.observe(98.5, &cfg));
        }
        assert!(!det.observe(100.5, &cfg));
        // Counting starts over from the new peak.
        for _ in 0..4 {
            assert!(!det.observe(99.3, &cfg));
        }
        assert!(det.observe(99.3, &cfg));
    }

    #[test]
    fn a_small_dip_neither_counts_nor_resets() {
        let mut det = ApogeeDetector::new(0.0);
        let cfg = FlightConfig::default();
        det.observe(100.0, &cfg);
        assert!(!det.observe(98.9, &cfg));
        assert!(!det.observe(98.9, &cfg));
        // Back above the threshold but below the peak: the count holds.
        assert!(!det.observe(99.5, &cfg));
        assert!(!det.observe(98.9, &cfg));
        assert!(!det.observe(98.9, &cfg));
        assert!(det.observe(98.9, &cfg));
    }

    /// Drives a machine to the tick the parachute fires and returns it
    /// along with that tick's timestamp.
    fn flown_to_deploy() -> (FlightStateMachine, u32) {
        let mut sm = armed();
        let mut t = 0;
        t += 10;
        sm.update(&sample(t, 5.0, pressure_at(0.0)), false);
        assert_eq!(sm.phase(), FlightPhase::Ascent);
        for step in 1..=100 {
            t += 10;
            sm.update(&sample(t, 0.5, pressure_at(step as f32)), false);
        }
        for _ in 0..4 {
            t += 10;
            let d = sm.update(&sample(t, 0.2, pressure_at(98.5)), false);
            assert_eq!(d.phase, FlightPhase::Ascent);
            assert!(!d.parachute_line);
        }
        t += 10;
        let d = sm.update(&sample(t, 0.2, pressure_at(98.5)), false);
        assert_eq!(d.phase, FlightPhase::ParachuteDeploy);
        assert!(d.parachute_line);
        assert_eq!(sm.deployed_at_ms(), Some(t));
        (sm, t)
    }

    #[test]
    fn deploy_holds_the_line_for_the_full_pulse_and_no_longer() {
        let (mut sm, entry) = flown_to_deploy();
        // Sensor input is irrelevant during the hold; only time ends it.
        let mut t = entry;
        while t + 10 < entry + 5000 {
            t += 10;
            let d = sm.update(&sample(t, 0.3, pressure_at(97.0)), false);
            assert!(d.parachute_line, "line dropped at t={t}");
            assert_eq!(d.phase, FlightPhase::ParachuteDeploy);
        }
        let d = sm.update(&sample(entry + 5000, 0.3, pressure_at(90.0)), false);
        assert!(!d.parachute_line);
        assert_eq!(d.phase, FlightPhase::Descent);
    }

    #[test]
    fn landing_checks_stay_quiet_through_the_opening_transient() {
        let cfg = FlightConfig::default();
        let mut tracker = DescentTracker {
            entry_ms: 0,
            previous_altitude_m: 90.0,
            stable_samples: 0,
        };
        // Stable altitude and one g, but still inside the window.
        for t in (10..10_000).step_by(10) {
            assert!(!tracker.observe(50.0, 1.0, t, false, &cfg));
        }
    }

    #[test]
    fn hard_timeout_fires_just_past_the_limit() {
        let cfg = FlightConfig::default();
        let mut tracker = DescentTracker {
            entry_ms: 0,
            previous_altitude_m: 90.0,
            stable_samples: 0,
        };
        // High acceleration keeps the stability path from ever firing.
        assert!(!tracker.observe(50.0, 2.0, 29_999, false, &cfg));
        assert!(!tracker.observe(50.0, 2.0, 30_000, false, &cfg));
        assert!(tracker.observe(50.0, 2.0, 30_001, false, &cfg));
    }

    #[test]
    fn touchdown_needs_stability_and_low_acceleration_together() {
        let cfg = FlightConfig::default();
        let mut tracker = DescentTracker {
            entry_ms: 0,
            previous_altitude_m: 3.0,
            stable_samples: 0,
        };
        let mut t = 10_000;
        // Altitude holds still but the airframe is still being shaken.
        for _ in 0..6 {
            t += 10;
            assert!(!tracker.observe(3.0, 1.5, t, false, &cfg));
        }
        // Calm plus the fourth consecutive stable tick lands it.
        t += 10;
        assert!(tracker.observe(3.0, 1.0, t, false, &cfg));
    }

    #[test]
    fn altitude_movement_resets_the_stability_count() {
        let cfg = FlightConfig::default();
        let mut tracker = DescentTracker {
            entry_ms: 0,
            previous_altitude_m: 40.0,
            stable_samples: 0,
        };
        let mut t = 10_000;
        for _ in 0..3 {
            t += 10;
            assert!(!tracker.observe(40.0, 1.0, t, false, &cfg));
        }
        t += 10;
        assert!(!tracker.observe(38.0, 1.0, t, false, &cfg));
        assert_eq!(tracker.stable_samples, 0);
        for _ in 0..3 {
            t += 10;
            assert!(!tracker.observe(38.0, 1.0, t, false, &cfg));
        }
        t += 10;
        assert!(tracker.observe(38.0, 1.0, t, false, &cfg));
    }

    #[test]
    fn abort_wins_even_inside_the_opening_transient() {
        let cfg = FlightConfig::default();
        let mut tracker = DescentTracker {
            entry_ms: 0,
            previous_altitude_m: 90.0,
            stable_samples: 0,
        };
        assert!(!tracker.observe(80.0, 1.0, 1000, false, &cfg));
        assert!(tracker.observe(79.0, 1.0, 2000, true, &cfg));
    }

    #[test]
    fn abort_is_ignored_outside_descent() {
        let mut sm = armed();
        let d = sm.update(&sample(10, 1.0, pressure_at(0.0)), true);
        assert_eq!(d.phase, FlightPhase::PreFlight);
        let d = sm.update(&sample(20, 5.0, pressure_at(0.0)), true);
        assert_eq!(d.phase, FlightPhase::Ascent);
        let d = sm.update(&sample(30, 0.5, pressure_at(10.0)), true);
        assert_eq!(d.phase, FlightPhase::Ascent);
        assert!(sm.shutdown_cause().is_none());
    }

    #[test]
    fn manual_abort_shuts_the_mission_down() {
        let (mut sm, entry) = flown_to_deploy();
        let mut t = entry;
        while sm.phase() == FlightPhase::ParachuteDeploy {
            t += 10;
            sm.update(&sample(t, 0.9, pressure_at(80.0)), false);
        }
        t += 10;
        let d = sm.update(&sample(t, 0.9, pressure_at(79.0)), true);
        assert_eq!(d.phase, FlightPhase::Shutdown);
        assert_eq!(sm.shutdown_cause(), Some(ShutdownCause::ManualAbort));
    }

    #[test]
    fn full_flight_walks_every_phase_in_order() {
        let mut sm = armed();
        let mut phases = vec![sm.phase()];
        let mut t = 0;
        let step = |sm: &mut FlightStateMachine, t: &mut u32, accel: f32, alt: f32| {
            *t += 10;
            let d = sm.update(&sample(*t, accel, pressure_at(alt)), false);
            d.phase
        };

        phases.push(step(&mut sm, &mut t, 5.0, 0.0));
        for alt in 1..=120 {
            phases.push(step(&mut sm, &mut t, 2.0, alt as f32));
        }
        while sm.phase() == FlightPhase::Ascent {
            phases.push(step(&mut sm, &mut t, 0.2, 118.0));
        }
        while sm.phase() == FlightPhase::ParachuteDeploy {
            phases.push(step(&mut sm, &mut t, 0.8, 100.0));
        }
        let descent_entry = t;
        while sm.phase() == FlightPhase::Descent {
            phases.push(step(&mut sm, &mut t, 1.0, 2.0));
            assert!(t - descent_entry < 15_000, "stability never fired");
        }

        assert_eq!(sm.phase(), FlightPhase::Shutdown);
        assert_eq!(sm.shutdown_cause(), Some(ShutdownCause::Landed));
        assert!((sm.peak_altitude_m() - 120.0).abs() < 0.5);
        // Monotonic, no skips, all five phases visited.
        assert!(phases.windows(2).all(|w| w[0] <= w[1]));
        assert!(phases.windows(2).all(|w| w[1].value() - w[0].value() <= 1));
        for phase in [
            FlightPhase::PreFlight,
            FlightPhase::Ascent,
            FlightPhase::ParachuteDeploy,
            FlightPhase::Descent,
            FlightPhase::Shutdown,
        ] {
            assert!(phases.contains(&phase));
        }
    }

    #[test]
    fn shutdown_absorbs_further_ticks() {
        let (mut sm, entry) = flown_to_deploy();
        let mut t = entry;
        for _ in 0..4000 {
            t += 10;
            sm.update(&sample(t, 2.0, pressure_at(50.0)), false);
        }
        assert_eq!(sm.phase(), FlightPhase::Shutdown);
        assert_eq!(sm.shutdown_cause(), Some(ShutdownCause::Timeout));
        let d = sm.update(&sample(t + 10, 5.0, pressure_at(0.0)), true);
        assert_eq!(d.phase, FlightPhase::Shutdown);
        assert!(!d.transitioned);
        assert!(!d.parachute_line);
    }
}
