use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated RGB triple sent to the strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[i32; 3]", into = "[u8; 3]")]
pub struct RgbColor {
    r: u8,
    g: u8,
    b: u8,
}

impl RgbColor {
    pub const WHITE: RgbColor = RgbColor::from_rgb(255, 255, 255);

    /// Build a color from loosely typed channel values (UI sliders, shortcuts, saved files)
    pub fn new(r: i32, g: i32, b: i32) -> Result<Self, ValidationError> {
        Ok(Self {
            r: component("red", r)?,
            g: component("green", g)?,
            b: component("blue", b)?,
        })
    }

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn r(&self) -> u8 {
        self.r
    }

    pub fn g(&self) -> u8 {
        self.g
    }

    pub fn b(&self) -> u8 {
        self.b
    }

    pub fn components(&self) -> (u8, u8, u8) {
        (self.r, self.g, self.b)
    }
}

fn component(channel: &'static str, value: i32) -> Result<u8, ValidationError> {
    u8::try_from(value).map_err(|_| ValidationError::InvalidComponent { channel, value })
}

impl TryFrom<[i32; 3]> for RgbColor {
    type Error = ValidationError;

    fn try_from([r, g, b]: [i32; 3]) -> Result<Self, Self::Error> {
        Self::new(r, g, b)
    }
}

impl From<RgbColor> for [u8; 3] {
    fn from(color: RgbColor) -> Self {
        [color.r, color.g, color.b]
    }
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Preset colors offered by the UI and voice shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    Red,
    Blue,
    Green,
    Purple,
    White,
    /// No fixed mapping; carries its own RGB
    Custom(RgbColor),
}

impl LedColor {
    pub fn to_rgb(self) -> RgbColor {
        match self {
            Self::Red => RgbColor::from_rgb(255, 0, 0),
            Self::Blue => RgbColor::from_rgb(0, 0, 255),
            Self::Green => RgbColor::from_rgb(0, 255, 0),
            Self::Purple => RgbColor::from_rgb(255, 0, 255),
            Self::White => RgbColor::WHITE,
            Self::Custom(rgb) => rgb,
        }
    }

    /// Look up a preset by name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "red" => Some(Self::Red),
            "blue" => Some(Self::Blue),
            "green" => Some(Self::Green),
            "purple" => Some(Self::Purple),
            "white" => Some(Self::White),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_full_range() {
        let c = RgbColor::new(0, 128, 255).unwrap();
        assert_eq!(c.components(), (0, 128, 255));
    }

    #[test]
    fn test_new_rejects_out_of_range_channel() {
        assert_eq!(
            RgbColor::new(0, 256, 0),
            Err(ValidationError::InvalidComponent {
                channel: "green",
                value: 256
            })
        );
        assert!(RgbColor::new(-1, 0, 0).is_err());
        assert!(RgbColor::new(0, 0, 1000).is_err());
    }

    #[test]
    fn test_named_color_table() {
        assert_eq!(LedColor::Red.to_rgb().components(), (255, 0, 0));
        assert_eq!(LedColor::Blue.to_rgb().components(), (0, 0, 255));
        assert_eq!(LedColor::Green.to_rgb().components(), (0, 255, 0));
        assert_eq!(LedColor::Purple.to_rgb().components(), (255, 0, 255));
        assert_eq!(LedColor::White.to_rgb().components(), (255, 255, 255));

        let teal = RgbColor::from_rgb(0, 128, 128);
        assert_eq!(LedColor::Custom(teal).to_rgb(), teal);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(LedColor::from_name("PURPLE"), Some(LedColor::Purple));
        assert_eq!(LedColor::from_name("orange"), None);
    }

    #[test]
    fn test_serde_rejects_bad_channel() {
        let c: RgbColor = serde_json::from_str("[1,2,3]").unwrap();
        assert_eq!(c, RgbColor::from_rgb(1, 2, 3));
        assert_eq!(serde_json::to_string(&c).unwrap(), "[1,2,3]");
        assert!(serde_json::from_str::<RgbColor>("[1,2,300]").is_err());
    }
}
