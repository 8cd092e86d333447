//! Flight records: one line per tick in the format the ground station parses.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::sensors::SensorSample;
use crate::state::FlightPhase;

/// Builds one record line. Field order and precision are load-bearing for
/// the ground station: numeric phase, mission time, acceleration, rotation,
/// pressure, temperature. No header line precedes the records.
pub fn record_line(phase: FlightPhase, sample: &SensorSample) -> String {
    format!(
        "{} {} {:.4} {:.4} {:.4} {:.4} {:.4} {:.4} {:.4} {:.2}",
        phase.value(),
        sample.timestamp_ms,
        sample.acceleration[0],
        sample.acceleration[1],
        sample.acceleration[2],
        sample.rotation[0],
        sample.rotation[1],
        sample.rotation[2],
        sample.pressure_hpa,
        sample.temperature_c,
    )
}

pub struct FlightLogger {
    writer: BufWriter<File>,
}

impl FlightLogger {
    /// Opens a fresh record file named after the current UTC time.
    /// Failing here keeps the mission on the ground.
    pub fn create(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "{}.log",
            chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S")
        ));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(FlightLogger {
            writer: BufWriter::new(file),
        })
    }

    /// Appends one record. Once airborne a failed write is reported and
    /// dropped; record keeping never stalls the tick loop.
    pub fn append(&mut self, phase: FlightPhase, sample: &SensorSample, altitude_m: f32) {
        debug!(
            "t={} ms phase={} alt={:.1} m",
            sample.timestamp_ms,
            phase.name(),
            altitude_m
        );
        if let Err(e) = writeln!(self.writer, "{}", record_line(phase, sample)) {
            warn!("failed to write flight record: {}", e);
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for FlightLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
