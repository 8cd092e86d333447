//! Simulated collaborators: a scripted vertical flight with seeded sensor
//! noise, driving the same decision core as a live mission.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::sensors::{
    AbortSwitch, Indicator, ParachuteLine, SensorFault, SensorSample, SensorSource, Signal,
};

const GROUND_PRESSURE_HPA: f32 = 1013.25;
const PRESSURE_NOISE_HPA: f32 = 0.03;
const ACCEL_NOISE_G: f32 = 0.05;
const G_MPS2: f32 = 9.80665;

const PAD_S: f32 = 2.0;
const BOOST_S: f32 = 1.2;
const BOOST_ACCEL_G: f32 = 5.0;
const CANOPY_DELAY_S: f32 = 2.0;
const SINK_RATE_MPS: f32 = 12.0;

/// Closed-form vertical profile: pad hold, constant-thrust boost, ballistic
/// coast over the top, canopy descent at a fixed sink rate, ground rest.
/// The canopy opens on the script clock, not on the machine's decision; the
/// decision core only ever sees the samples.
struct Profile {
    boost_end_s: f32,
    burnout_alt_m: f32,
    burnout_v_mps: f32,
    canopy_s: f32,
    canopy_alt_m: f32,
    touchdown_s: f32,
}

impl Profile {
    fn new() -> Self {
        // The accelerometer reads thrust over mass; net climb is one g less.
        let kinematic = (BOOST_ACCEL_G - 1.0) * G_MPS2;
        let burnout_v_mps = kinematic * BOOST_S;
        let burnout_alt_m = 0.5 * kinematic * BOOST_S * BOOST_S;
        let apogee_s = PAD_S + BOOST_S + burnout_v_mps / G_MPS2;
        let canopy_s = apogee_s + CANOPY_DELAY_S;
        let dt = canopy_s - (PAD_S + BOOST_S);
        let canopy_alt_m = burnout_alt_m + burnout_v_mps * dt - 0.5 * G_MPS2 * dt * dt;
        let touchdown_s = canopy_s + canopy_alt_m / SINK_RATE_MPS;
        Profile {
            boost_end_s: PAD_S + BOOST_S,
            burnout_alt_m,
            burnout_v_mps,
            canopy_s,
            canopy_alt_m,
            touchdown_s,
        }
    }

    /// Altitude in meters and accelerometer magnitude in g at mission time.
    fn sample(&self, t_s: f32) -> (f32, f32) {
        if t_s < PAD_S {
            (0.0, 1.0)
        } else if t_s < self.boost_end_s {
            let dt = t_s - PAD_S;
            let alt = 0.5 * (BOOST_ACCEL_G - 1.0) * G_MPS2 * dt * dt;
            (alt, BOOST_ACCEL_G)
        } else if t_s < self.canopy_s {
            // Coasting airframe is in free fall; the accelerometer reads zero.
            let dt = t_s - self.boost_end_s;
            let alt = self.burnout_alt_m + self.burnout_v_mps * dt - 0.5 * G_MPS2 * dt * dt;
            (alt, 0.0)
        } else if t_s < self.touchdown_s {
            let alt = self.canopy_alt_m - SINK_RATE_MPS * (t_s - self.canopy_s);
            (alt, 1.0)
        } else {
            (0.0, 1.0)
        }
    }
}

fn pressure_at_altitude(altitude_m: f32) -> f32 {
    GROUND_PRESSURE_HPA * (1.0 - altitude_m / 44330.0).powf(1.0 / 0.1903)
}

pub struct BenchSensors {
    profile: Profile,
    clock_ms: Rc<Cell<u32>>,
    next_ms: u32,
    tick_ms: u32,
    rng: StdRng,
    pressure_noise: Normal<f32>,
    accel_noise: Normal<f32>,
}

impl SensorSource for BenchSensors {
    fn read(&mut self) -> Result<SensorSample, SensorFault> {
        // Collaborators polled later in the tick see this sample's time.
        let now_ms = self.next_ms;
        self.next_ms = now_ms + self.tick_ms;
        self.clock_ms.set(now_ms);

        let (altitude_m, accel_g) = self.profile.sample(now_ms as f32 / 1000.0);
        let pressure_hpa =
            pressure_at_altitude(altitude_m) + self.pressure_noise.sample(&mut self.rng);
        let accel_z = accel_g + self.accel_noise.sample(&mut self.rng);

        Ok(SensorSample {
            timestamp_ms: now_ms,
            acceleration: [0.0, 0.0, accel_z],
            rotation: [0.0; 3],
            pressure_hpa,
            temperature_c: 20.0,
        })
    }
}

/// Records every level change so a run's deployment pulse can be checked
/// after the fact.
pub struct BenchParachute {
    clock_ms: Rc<Cell<u32>>,
    level: bool,
    edges: Rc<RefCell<Vec<(u32, bool)>>>,
}

impl ParachuteLine for BenchParachute {
    fn set_deployed(&mut self, deployed: bool) {
        if deployed != self.level {
            self.level = deployed;
            let t = self.clock_ms.get();
            debug!("parachute line -> {} at t={} ms", deployed, t);
            self.edges.borrow_mut().push((t, deployed));
        }
    }
}

pub struct BenchIndicator;

impl Indicator for BenchIndicator {
    fn set_signal(&mut self, signal: Signal, on: bool) {
        debug!("indicator {:?} -> {}", signal, on);
    }
}

/// Presses the abort button at a scripted mission time and holds it.
pub struct BenchAbortSwitch {
    clock_ms: Rc<Cell<u32>>,
    abort_at_ms: Option<u32>,
}

impl AbortSwitch for BenchAbortSwitch {
    fn abort_requested(&self) -> bool {
        matches!(self.abort_at_ms, Some(at) if self.clock_ms.get() >= at)
    }
}

/// The full set of simulated collaborators sharing one sample clock.
pub struct BenchRig {
    pub sensors: BenchSensors,
    pub parachute: BenchParachute,
    pub indicator: BenchIndicator,
    pub abort: BenchAbortSwitch,
    pub line_edges: Rc<RefCell<Vec<(u32, bool)>>>,
}

impl BenchRig {
    pub fn new(tick_ms: u32, seed: u64, abort_at_ms: Option<u32>) -> anyhow::Result<Self> {
        let clock_ms = Rc::new(Cell::new(0));
        let line_edges = Rc::new(RefCell::new(Vec::new()));

        let sensors = BenchSensors {
            profile: Profile::new(),
            clock_ms: Rc::clone(&clock_ms),
            next_ms: 0,
            tick_ms,
            rng: StdRng::seed_from_u64(seed),
            pressure_noise: Normal::new(0.0, PRESSURE_NOISE_HPA)?,
            accel_noise: Normal::new(0.0, ACCEL_NOISE_G)?,
        };

        Ok(BenchRig {
            sensors,
            parachute: BenchParachute {
                clock_ms: Rc::clone(&clock_ms),
                level: false,
                edges: Rc::clone(&line_edges),
            },
            indicator: BenchIndicator,
            abort: BenchAbortSwitch {
                clock_ms,
                abort_at_ms,
            },
            line_edges,
        })
    }
}
