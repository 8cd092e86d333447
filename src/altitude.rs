//! Barometric altitude relative to the launch site, with smoothing.

/// Converts pressure into altitude above the arming point and runs it
/// through a first-order exponential filter. The filter trades about a
/// second of lag for immunity to the meter-scale jitter the barometer
/// shows between consecutive ticks.
pub struct AltitudeEstimator {
    reference_pressure_hpa: f32,
    smoothing: f32,
    smoothed_m: f32,
}

impl AltitudeEstimator {
    /// The reference pressure comes from a single ground sample taken at
    /// arming time and never changes afterwards.
    pub fn new(reference_pressure_hpa: f32, smoothing: f32) -> Self {
        AltitudeEstimator {
            reference_pressure_hpa,
            smoothing,
            smoothed_m: 0.0,
        }
    }

    /// Feeds one pressure sample through the filter and returns the new
    /// estimate.
    pub fn update(&mut self, pressure_hpa: f32) -> f32 {
        let raw = self.raw_altitude_m(pressure_hpa);
        self.smoothed_m = self.smoothing * self.smoothed_m + (1.0 - self.smoothing) * raw;
        self.smoothed_m
    }

    pub fn altitude_m(&self) -> f32 {
        self.smoothed_m
    }

    // International barometric formula.
    fn raw_altitude_m(&self, pressure_hpa: f32) -> f32 {
        44330.0 * (1.0 - (pressure_hpa / self.reference_pressure_hpa).powf(0.1903))
    }
}
