//! Mission tunables and the run mode.

use clap::{Args, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Live sensors and GPIO on the flight computer.
    Flight,
    /// Simulated flight profile, no hardware attached.
    Bench,
}

/// Decision thresholds, tuned on earlier Kestrel airframes. The defaults fly;
/// the flags exist for bench experiments and the occasional field retune.
#[derive(Args, Clone, Debug)]
pub struct FlightConfig {
    /// Tick period in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub tick_ms: u32,

    /// Acceleration that counts as liftoff, in g.
    #[arg(long, default_value_t = 1.8)]
    pub launch_accel_g: f32,

    /// Drop below the running peak that counts toward apogee, in meters.
    #[arg(long, default_value_t = 1.0)]
    pub apogee_drop_m: f32,

    /// Consecutive qualifying drops before the parachute fires.
    #[arg(long, default_value_t = 5)]
    pub apogee_drop_samples: u32,

    /// How long the deployment line stays asserted, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub deploy_hold_ms: u32,

    /// Opening-transient window after deployment during which landing
    /// checks are suppressed, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub descent_ignore_ms: u32,

    /// Descent time after which the mission closes out no matter what,
    /// in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub descent_max_ms: u32,

    /// Tick-to-tick altitude change treated as stationary, in meters.
    #[arg(long, default_value_t = 0.5)]
    pub landing_delta_m: f32,

    /// Stationary ticks that must be exceeded before touchdown is declared.
    #[arg(long, default_value_t = 3)]
    pub landing_stable_samples: u32,

    /// Acceleration ceiling for touchdown, in g.
    #[arg(long, default_value_t = 1.1)]
    pub landing_accel_g: f32,

    /// Weight kept on the previous altitude estimate each tick.
    #[arg(long, default_value_t = 0.9)]
    pub smoothing: f32,
}

impl Default for FlightConfig {
    fn default() -> Self {
        FlightConfig {
            tick_ms: 10,
            launch_accel_g: 1.8,
            apogee_drop_m: 1.0,
            apogee_drop_samples: 5,
            deploy_hold_ms: 5000,
            descent_ignore_ms: 10_000,
            descent_max_ms: 30_000,
            landing_delta_m: 0.5,
            landing_stable_samples: 3,
            landing_accel_g: 1.1,
            smoothing: 0.9,
        }
    }
}
