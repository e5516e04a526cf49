//! Board hardware behind the built-in functions.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("board error: {0}")]
pub struct BoardError(pub String);

/// LED, temperature sensor and restart.
pub trait Board: Send + Sync {
    fn set_led(&self, on: bool) -> Result<(), BoardError>;

    /// Die temperature in degrees Celsius.
    fn temperature_c(&self) -> Result<f32, BoardError>;

    /// Restart the device. On hardware this does not return.
    fn restart(&self);
}
