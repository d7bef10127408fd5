//! Control ELK-BLEDOM compatible BLE LED strips: color, brightness and
//! power commands over a self-healing connection.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::color::{LedColor, RgbColor};
pub use domain::models::{BrightnessLevel, ConnectionPhase, ConnectionSnapshot, DeviceId};
pub use error::{LedError, Result};
pub use infrastructure::bluetooth::LedController;
