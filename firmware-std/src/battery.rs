//! BQ27441 fuel gauge (I2C).
//!
//! Reads the standard Voltage and AverageCurrent command words. The
//! gauge sits on its own I2C controller, so the driver owns the bus
//! outright; [`SharedGauge`] is the cloneable handle the capture
//! session consumes, one clone per session.

use std::sync::{Arc, Mutex};

use esp_idf_svc::hal::delay::BLOCK;
use esp_idf_svc::hal::i2c::I2cDriver;
use esp_idf_svc::sys::EspError;

use probelog::session::{BatteryGauge, BatterySample};

pub const BQ27441_ADDR: u8 = 0x55;

// Standard command words, little-endian
const CMD_VOLTAGE: u8 = 0x04;
const CMD_AVG_CURRENT: u8 = 0x10;

pub struct Bq27441 {
    i2c: I2cDriver<'static>,
}

impl Bq27441 {
    /// Probe the gauge; `None` when nothing answers on the bus.
    pub fn detect(i2c: I2cDriver<'static>) -> Option<Self> {
        let mut gauge = Self { i2c };
        match gauge.read_word(CMD_VOLTAGE) {
            Ok(millivolts) => {
                log::info!("BQ27441 detected ({millivolts} mV)");
                Some(gauge)
            }
            Err(e) => {
                log::warn!("BQ27441 not detected: {e}");
                None
            }
        }
    }

    fn read_word(&mut self, command: u8) -> Result<u16, EspError> {
        let mut buf = [0u8; 2];
        self.i2c.write_read(BQ27441_ADDR, &[command], &mut buf, BLOCK)?;
        Ok(u16::from_le_bytes(buf))
    }
}

impl BatteryGauge for Bq27441 {
    fn sample(&mut self) -> Option<BatterySample> {
        let millivolts = match self.read_word(CMD_VOLTAGE) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("battery voltage read failed: {e}");
                return None;
            }
        };
        let milliamps = match self.read_word(CMD_AVG_CURRENT) {
            Ok(value) => value as i16,
            Err(e) => {
                log::debug!("battery current read failed: {e}");
                return None;
            }
        };
        Some(BatterySample {
            millivolts,
            milliamps,
        })
    }
}

/// Cloneable gauge handle; the hardware driver outlives any one capture
/// session.
#[derive(Clone)]
pub struct SharedGauge {
    inner: Arc<Mutex<Bq27441>>,
}

impl SharedGauge {
    pub fn new(gauge: Bq27441) -> Self {
        Self {
            inner: Arc::new(Mutex::new(gauge)),
        }
    }
}

impl BatteryGauge for SharedGauge {
    fn sample(&mut self) -> Option<BatterySample> {
        self.inner.lock().ok()?.sample()
    }
}
