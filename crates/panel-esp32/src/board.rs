//! Board peripherals.
//!
//! The on-chip temperature sensor driver covers the ESP32-S2, S3 and
//! C-series chips.

use std::sync::Mutex;

use esp_idf_svc::hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::reset;
use esp_idf_svc::hal::temp_sensor::{TempSensor, TempSensorConfig, TempSensorDriver};
use log::info;

use panel_server::{Board, BoardError};

pub struct EspBoard {
    led: Mutex<PinDriver<'static, AnyOutputPin, Output>>,
    sensor: Mutex<TempSensorDriver<'static>>,
}

impl EspBoard {
    pub fn new(
        led: AnyOutputPin,
        sensor: impl Peripheral<P = TempSensor> + 'static,
    ) -> anyhow::Result<Self> {
        let led = PinDriver::output(led)?;
        let mut sensor = TempSensorDriver::new(&TempSensorConfig::default(), sensor)?;
        sensor.enable()?;
        Ok(Self {
            led: Mutex::new(led),
            sensor: Mutex::new(sensor),
        })
    }
}

fn poisoned<T>(_: T) -> BoardError {
    BoardError("peripheral lock poisoned".to_string())
}

impl Board for EspBoard {
    fn set_led(&self, on: bool) -> Result<(), BoardError> {
        let mut led = self.led.lock().map_err(poisoned)?;
        let result = if on { led.set_high() } else { led.set_low() };
        result.map_err(|e| BoardError(e.to_string()))
    }

    fn temperature_c(&self) -> Result<f32, BoardError> {
        self.sensor
            .lock()
            .map_err(poisoned)?
            .get_celsius()
            .map_err(|e| BoardError(e.to_string()))
    }

    fn restart(&self) {
        info!("Restarting");
        reset::restart();
    }
}
