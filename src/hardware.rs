//! Live collaborators: the BMP280/MPU6050 pair over I2C and the sysfs GPIO
//! lines for the parachute, indicators, and abort button.

use std::thread;
use std::time::{Duration, Instant};

use bmp280::{Bmp280, Bmp280Builder};
use embedded_hal::digital::v2::{InputPin, OutputPin};
use linux_embedded_hal::sysfs_gpio::{self, Direction};
use linux_embedded_hal::{Delay, I2cdev, SysfsPin};
use mpu6050::Mpu6050;
use tracing::{debug, info, warn};

use crate::sensors::{
    AbortSwitch, Indicator, ParachuteLine, SensorFault, SensorSample, SensorSource, Signal,
};

// BCM pin numbers, matching the flight harness.
pub const PARACHUTE_PIN: u64 = 18;
pub const BUZZER_PIN: u64 = 23;
pub const LED_PIN: u64 = 15;
pub const ABORT_PIN: u64 = 19;

const I2C_BUS: &str = "/dev/i2c-1";
const SENSOR_INIT_ATTEMPTS: u32 = 10;

pub struct HardwareSensors {
    bmp280: Bmp280,
    mpu6050: Mpu6050<I2cdev>,
    started: Instant,
}

impl HardwareSensors {
    /// Brings both sensors up, retrying for a while since the I2C bus can
    /// be flaky right after power-on. Runs before arming, so waiting here
    /// is fine.
    pub fn init() -> Result<Self, SensorFault> {
        let mut attempts = 0;
        let bmp280 = loop {
            match Bmp280Builder::new().build() {
                Ok(dev) => break dev,
                Err(e) => {
                    attempts += 1;
                    if attempts >= SENSOR_INIT_ATTEMPTS {
                        return Err(SensorFault::Barometer(format!("{:?}", e)));
                    }
                    info!("waiting for barometer: {:?}", e);
                    thread::sleep(Duration::from_secs(1));
                }
            }
        };

        let i2c = I2cdev::new(I2C_BUS)
            .map_err(|e| SensorFault::Accelerometer(format!("{:?}", e)))?;
        let mut delay = Delay;
        let mut mpu6050 = Mpu6050::new_with_addr(i2c, 0x68);
        if let Err(e) = mpu6050.init(&mut delay) {
            // Boards with AD0 strapped high answer on the alternate address.
            warn!("accelerometer init failed at 0x68: {:?}, trying 0x69", e);
            let i2c = I2cdev::new(I2C_BUS)
                .map_err(|e| SensorFault::Accelerometer(format!("{:?}", e)))?;
            mpu6050 = Mpu6050::new_with_addr(i2c, 0x69);
            mpu6050
                .init(&mut delay)
                .map_err(|e| SensorFault::Accelerometer(format!("{:?}", e)))?;
        }

        info!("sensors up");
        Ok(HardwareSensors {
            bmp280,
            mpu6050,
            started: Instant::now(),
        })
    }
}

impl SensorSource for HardwareSensors {
    fn read(&mut self) -> Result<SensorSample, SensorFault> {
        let pressure_kpa = self
            .bmp280
            .pressure_kpa()
            .map_err(|e| SensorFault::Barometer(format!("{:?}", e)))?;
        let pressure_hpa = pressure_kpa * 10.0;
        if !pressure_hpa.is_finite() || pressure_hpa <= 0.0 {
            return Err(SensorFault::PressureOutOfRange(pressure_hpa));
        }
        let temperature_c = self
            .bmp280
            .temperature_celsius()
            .map_err(|e| SensorFault::Barometer(format!("{:?}", e)))?;

        let acc = self
            .mpu6050
            .get_acc()
            .map_err(|e| SensorFault::Accelerometer(format!("{:?}", e)))?;
        let gyro = self
            .mpu6050
            .get_gyro()
            .map_err(|e| SensorFault::Accelerometer(format!("{:?}", e)))?;

        Ok(SensorSample {
            timestamp_ms: self.started.elapsed().as_millis() as u32,
            acceleration: [acc.x, acc.y, acc.z],
            rotation: [gyro.x, gyro.y, gyro.z],
            pressure_hpa,
            temperature_c,
        })
    }
}

fn output_pin(number: u64) -> Result<SysfsPin, sysfs_gpio::Error> {
    let pin = SysfsPin::new(number);
    pin.0.export()?;
    // The sysfs node takes a moment to appear after export.
    thread::sleep(Duration::from_millis(50));
    pin.0.set_direction(Direction::Out)?;
    pin.0.set_value(0)?;
    Ok(pin)
}

fn input_pin(number: u64) -> Result<SysfsPin, sysfs_gpio::Error> {
    let pin = SysfsPin::new(number);
    pin.0.export()?;
    thread::sleep(Duration::from_millis(50));
    pin.0.set_direction(Direction::In)?;
    Ok(pin)
}

pub struct HardwareParachute {
    pin: SysfsPin,
}

impl HardwareParachute {
    /// The line comes up de-asserted.
    pub fn init() -> Result<Self, sysfs_gpio::Error> {
        Ok(HardwareParachute {
            pin: output_pin(PARACHUTE_PIN)?,
        })
    }
}

impl ParachuteLine for HardwareParachute {
    fn set_deployed(&mut self, deployed: bool) {
        let result = if deployed {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(e) = result {
            // The level is re-issued every tick, so the next one retries.
            warn!("parachute line write failed: {:?}", e);
        }
    }
}

pub struct HardwareIndicator {
    led: SysfsPin,
    buzzer: SysfsPin,
}

impl HardwareIndicator {
    pub fn init() -> Result<Self, sysfs_gpio::Error> {
        Ok(HardwareIndicator {
            led: output_pin(LED_PIN)?,
            buzzer: output_pin(BUZZER_PIN)?,
        })
    }
}

impl Indicator for HardwareIndicator {
    fn set_signal(&mut self, signal: Signal, on: bool) {
        let pin = match signal {
            Signal::Led => &mut self.led,
            Signal::Buzzer => &mut self.buzzer,
        };
        let result = if on { pin.set_high() } else { pin.set_low() };
        if let Err(e) = result {
            debug!("indicator write failed on {:?}: {:?}", signal, e);
        }
    }
}

pub struct HardwareAbort {
    pin: SysfsPin,
}

impl HardwareAbort {
    pub fn init() -> Result<Self, sysfs_gpio::Error> {
        Ok(HardwareAbort {
            pin: input_pin(ABORT_PIN)?,
        })
    }
}

impl AbortSwitch for HardwareAbort {
    fn abort_requested(&self) -> bool {
        // An unreadable switch never aborts.
        self.pin.is_high().unwrap_or(false)
    }
}
