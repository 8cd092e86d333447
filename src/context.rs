use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::FlightConfig;
use crate::logger::{FlightLogger, record_line};
use crate::sensors::{AbortSwitch, Indicator, ParachuteLine, SensorFault, SensorSource, Signal};
use crate::state::{FlightPhase, FlightStateMachine, ShutdownCause};
use crate::telemetry::Telemetry;

const TRANSMIT_PERIOD: Duration = Duration::from_millis(200);
const FLUSH_PERIOD: Duration = Duration::from_millis(300);

/// Everything a mission owns: the decision core plus the collaborators it
/// drives. One `update` per tick moves the whole system forward.
pub struct Context {
    machine: FlightStateMachine,
    sensors: Box<dyn SensorSource>,
    parachute: Box<dyn ParachuteLine>,
    indicator: Box<dyn Indicator>,
    abort_switch: Box<dyn AbortSwitch>,
    logger: FlightLogger,
    telemetry: Option<Telemetry>,
    last_transmit: Option<Instant>,
    last_flush: Option<Instant>,
    buzzer_on: bool,
    last_timestamp_ms: u32,
}

/// What the mission looked like when it ended.
#[derive(Debug)]
pub struct MissionSummary {
    pub phase: FlightPhase,
    pub peak_altitude_m: f32,
    pub deployed_at_ms: Option<u32>,
    pub cause: Option<ShutdownCause>,
    pub duration_ms: u32,
}

impl Context {
    /// Arms the mission: one ground sample fixes the reference pressure,
    /// and nothing flies if that sample cannot be read. The pad crew hears
    /// the outcome either way: the arming beeps on success, the abort
    /// signal on a dead sensor.
    pub fn arm(
        config: FlightConfig,
        paced: bool,
        mut sensors: Box<dyn SensorSource>,
        parachute: Box<dyn ParachuteLine>,
        mut indicator: Box<dyn Indicator>,
        abort_switch: Box<dyn AbortSwitch>,
        logger: FlightLogger,
        telemetry: Option<Telemetry>,
    ) -> Result<Self, SensorFault> {
        let ground = match sensors.read() {
            Ok(sample) => sample,
            Err(fault) => {
                signal_abort(indicator.as_mut(), paced);
                return Err(fault);
            }
        };
        info!(
            "armed with reference pressure {:.2} hPa at t={} ms",
            ground.pressure_hpa, ground.timestamp_ms
        );
        let machine = FlightStateMachine::arm(config, ground.pressure_hpa, ground.timestamp_ms);

        indicator.set_signal(Signal::Led, true);
        signal_armed(indicator.as_mut(), paced);

        Ok(Context {
            machine,
            sensors,
            parachute,
            indicator,
            abort_switch,
            logger,
            telemetry,
            last_transmit: None,
            last_flush: None,
            buzzer_on: false,
            last_timestamp_ms: ground.timestamp_ms,
        })
    }

    /// One tick: read, decide, actuate, record. An error means the sensors
    /// are gone and the mission is over.
    pub fn update(&mut self) -> Result<(), SensorFault> {
        let sample = self.sensors.read()?;
        self.last_timestamp_ms = sample.timestamp_ms;

        let abort = self.abort_switch.abort_requested();
        let decision = self.machine.update(&sample, abort);

        // The line level is re-issued every tick on purpose.
        self.parachute.set_deployed(decision.parachute_line);

        // One buzzer pulse per phase transition.
        if decision.transitioned {
            self.indicator.set_signal(Signal::Buzzer, true);
            self.buzzer_on = true;
        } else if self.buzzer_on {
            self.indicator.set_signal(Signal::Buzzer, false);
            self.buzzer_on = false;
        }

        self.logger
            .append(decision.phase, &sample, decision.altitude_m);

        let now = Instant::now();
        if due(self.last_transmit, now, TRANSMIT_PERIOD) {
            if let Some(telemetry) = self.telemetry.as_mut() {
                telemetry.send(&record_line(decision.phase, &sample));
            }
            self.last_transmit = Some(now);
        }
        if due(self.last_flush, now, FLUSH_PERIOD) {
            if let Err(e) = self.logger.flush() {
                warn!("flight record flush failed: {}", e);
            }
            self.last_flush = Some(now);
        }

        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.machine.is_terminal()
    }

    #[cfg(test)]
    pub fn phase(&self) -> FlightPhase {
        self.machine.phase()
    }

    pub fn shutdown_cause(&self) -> Option<ShutdownCause> {
        self.machine.shutdown_cause()
    }

    pub fn indicator_mut(&mut self) -> &mut dyn Indicator {
        self.indicator.as_mut()
    }

    /// Closes the mission out and hands back the numbers worth reporting.
    /// The parachute line never stays asserted past this point.
    pub fn finish(mut self) -> MissionSummary {
        self.parachute.set_deployed(false);
        if let Err(e) = self.logger.flush() {
            warn!("final flight record flush failed: {}", e);
        }
        MissionSummary {
            phase: self.machine.phase(),
            peak_altitude_m: self.machine.peak_altitude_m(),
            deployed_at_ms: self.machine.deployed_at_ms(),
            cause: self.machine.shutdown_cause(),
            duration_ms: self
                .last_timestamp_ms
                .saturating_sub(self.machine.armed_at_ms()),
        }
    }
}

fn due(last: Option<Instant>, now: Instant, period: Duration) -> bool {
    match last {
        Some(last) => now.duration_since(last) >= period,
        None => true,
    }
}

// The audible signals pace themselves with real sleeps only when `paced`
// is set; the bench runs them back to back.
fn pause_ms(ms: u64, paced: bool) {
    if paced {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Two short beeps: armed and ready.
fn signal_armed(indicator: &mut dyn Indicator, paced: bool) {
    for _ in 0..2 {
        indicator.set_signal(Signal::Buzzer, true);
        pause_ms(500, paced);
        indicator.set_signal(Signal::Buzzer, false);
        pause_ms(500, paced);
    }
}

/// One long beep, LED off: mission complete.
pub fn signal_shutdown(indicator: &mut dyn Indicator, paced: bool) {
    indicator.set_signal(Signal::Led, false);
    indicator.set_signal(Signal::Buzzer, true);
    pause_ms(1000, paced);
    indicator.set_signal(Signal::Buzzer, false);
}

/// Three short beeps, LED off: aborted.
pub fn signal_abort(indicator: &mut dyn Indicator, paced: bool) {
    indicator.set_signal(Signal::Led, false);
    for _ in 0..3 {
        indicator.set_signal(Signal::Buzzer, true);
        pause_ms(200, paced);
        indicator.set_signal(Signal::Buzzer, false);
        pause_ms(200, paced);
    }
}
