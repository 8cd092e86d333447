use thiserror::Error;

/// One reading per tick. Timestamps are milliseconds since the sensor
/// source came up and only move forward; every decision in the state
/// machine is made in this clock.
#[derive(Clone, Copy, Debug)]
pub struct SensorSample {
    pub timestamp_ms: u32,
    pub acceleration: [f32; 3], // g
    pub rotation: [f32; 3],     // rad/s
    pub pressure_hpa: f32,
    pub temperature_c: f32,
}

impl SensorSample {
    /// Magnitude of the acceleration vector in g.
    pub fn acceleration_g(&self) -> f32 {
        let [x, y, z] = self.acceleration;
        (x * x + y * y + z * z).sqrt()
    }
}

/// A reading we cannot trust. The mission aborts rather than guess.
#[derive(Debug, Error)]
pub enum SensorFault {
    #[error("barometer read failed: {0}")]
    Barometer(String),
    #[error("accelerometer read failed: {0}")]
    Accelerometer(String),
    #[error("pressure reading out of range: {0} hPa")]
    PressureOutOfRange(f32),
}

/// Produces one sample per tick, plus one more during arming for the
/// ground-pressure reference. Implementations must reject non-finite or
/// non-positive pressure so garbage never reaches the altitude filter.
pub trait SensorSource {
    fn read(&mut self) -> Result<SensorSample, SensorFault>;
}

/// The single binary output this computer controls. Calls are idempotent
/// and re-issued every tick, so a dropped write heals on the next one.
pub trait ParachuteLine {
    fn set_deployed(&mut self, deployed: bool);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Led,
    Buzzer,
}

/// Ground-visible status outputs. Best effort, failures stay local.
pub trait Indicator {
    fn set_signal(&mut self, signal: Signal, on: bool);
}

/// Manual override, polled every tick and honored during descent.
pub trait AbortSwitch {
    fn abort_requested(&self) -> bool;
}
