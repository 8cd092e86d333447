use std::io::Write;
use std::time::Duration;

use serialport::TTYPort;
use tracing::debug;

/// Live downlink to the ground station. Each message is one flight record
/// framed with a leading 'd' so the receiver can pick records out of the
/// console stream. Strictly best effort; the flight never waits on it
/// beyond the short port timeout.
pub struct Telemetry {
    port: TTYPort,
}

impl Telemetry {
    pub fn open(path: &str) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, 9600)
            .timeout(Duration::from_millis(100))
            .open_native()?;

        Ok(Telemetry { port })
    }

    pub fn send(&mut self, record: &str) {
        let framed = format!("d{}\n", record);
        if let Err(e) = self.port.write_all(framed.as_bytes()) {
            debug!("telemetry write failed: {}", e);
        }
    }
}
