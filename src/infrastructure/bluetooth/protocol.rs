//! LED Strip Protocol
//!
//! Fixed 9-byte command frames understood by ELK-BLEDOM style controllers.
//! Every frame starts with `0x7E` and ends with `0xEF`; writes are sent
//! without response and nothing is ever read back.

use crate::domain::color::RgbColor;
use crate::error::ValidationError;
use std::fmt;
use uuid::Uuid;

/// LED controller BLE Service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);

/// Write Characteristic UUID - where command frames are written
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb);

pub const FRAME_LEN: usize = 9;

const FRAME_START: u8 = 0x7E;
const FRAME_END: u8 = 0xEF;

/// One encoded device command
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandFrame([u8; FRAME_LEN]);

impl CommandFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; FRAME_LEN] {
        self.0
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandFrame({:02X?})", self.0)
    }
}

fn byte(field: &'static str, value: i32) -> Result<u8, ValidationError> {
    u8::try_from(value).map_err(|_| ValidationError::OutOfRange {
        field,
        value,
        min: 0,
        max: 255,
    })
}

/// Build color command
///
/// ```text
/// 7E 00 05 03 [r] [g] [b] 00 EF
/// ```
pub fn encode_color(r: i32, g: i32, b: i32) -> Result<CommandFrame, ValidationError> {
    let (r, g, b) = (byte("red", r)?, byte("green", g)?, byte("blue", b)?);
    Ok(CommandFrame([
        FRAME_START,
        0x00,
        0x05,
        0x03,
        r,
        g,
        b,
        0x00,
        FRAME_END,
    ]))
}

/// Color command for an already validated color
pub fn encode_rgb(color: RgbColor) -> CommandFrame {
    let (r, g, b) = color.components();
    CommandFrame([FRAME_START, 0x00, 0x05, 0x03, r, g, b, 0x00, FRAME_END])
}

/// Build brightness command from a device level (0-255)
///
/// ```text
/// 7E 00 01 [v] [v] 00 00 00 EF
/// ```
pub fn encode_brightness(level: i32) -> Result<CommandFrame, ValidationError> {
    let v = byte("brightness", level)?;
    Ok(brightness_frame(v))
}

fn brightness_frame(v: u8) -> CommandFrame {
    CommandFrame([FRAME_START, 0x00, 0x01, v, v, 0x00, 0x00, 0x00, FRAME_END])
}

/// Brightness command for a UI percentage (0-100)
pub fn encode_brightness_percent(percent: u8) -> CommandFrame {
    brightness_frame(percent_to_level(percent))
}

/// Build power ON command
pub fn encode_power_on() -> CommandFrame {
    CommandFrame([
        FRAME_START,
        0x04,
        0x04,
        0xF0,
        0x00,
        0x01,
        0xFF,
        0x00,
        FRAME_END,
    ])
}

/// Build power OFF command
pub fn encode_power_off() -> CommandFrame {
    CommandFrame([
        FRAME_START,
        0x04,
        0x04,
        0x00,
        0x00,
        0x00,
        0xFF,
        0x00,
        FRAME_END,
    ])
}

/// Scale a 0-100 percentage to the device's 0-255 level, truncating.
///
/// Percentages above 100 are treated as 100.
pub fn percent_to_level(percent: u8) -> u8 {
    let percent = u32::from(percent.min(100));
    (percent * 255 / 100) as u8
}

/// Validate a UI brightness percentage
pub fn validate_percent(percent: i32) -> Result<u8, ValidationError> {
    if (0..=100).contains(&percent) {
        Ok(percent as u8)
    } else {
        Err(ValidationError::OutOfRange {
            field: "brightness percent",
            value: percent,
            min: 0,
            max: 100,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000fff0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            WRITE_CHAR_UUID.to_string(),
            "0000fff3-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_color_frame_layout() {
        for (r, g, b) in [(0, 0, 0), (255, 0, 128), (1, 2, 3), (255, 255, 255)] {
            let frame = encode_color(r, g, b).unwrap();
            assert_eq!(
                frame.as_bytes(),
                &[0x7E, 0x00, 0x05, 0x03, r as u8, g as u8, b as u8, 0x00, 0xEF]
            );
        }
    }

    #[test]
    fn test_color_frame_rejects_out_of_range() {
        assert_eq!(
            encode_color(0, -1, 0),
            Err(ValidationError::OutOfRange {
                field: "green",
                value: -1,
                min: 0,
                max: 255
            })
        );
        assert!(encode_color(256, 0, 0).is_err());
        assert!(encode_color(0, 0, 999).is_err());
    }

    #[test]
    fn test_rgb_matches_raw_encoding() {
        let color = RgbColor::from_rgb(12, 34, 56);
        assert_eq!(encode_rgb(color), encode_color(12, 34, 56).unwrap());
    }

    #[test]
    fn test_brightness_frame_layout() {
        for v in 0..=255 {
            let frame = encode_brightness(v).unwrap();
            let v = v as u8;
            assert_eq!(
                frame.to_bytes(),
                [0x7E, 0x00, 0x01, v, v, 0x00, 0x00, 0x00, 0xEF]
            );
        }
        assert!(encode_brightness(256).is_err());
        assert!(encode_brightness(-5).is_err());
    }

    #[test]
    fn test_power_frames() {
        let on = encode_power_on().to_bytes();
        let off = encode_power_off().to_bytes();
        assert_eq!(on, [0x7E, 0x04, 0x04, 0xF0, 0x00, 0x01, 0xFF, 0x00, 0xEF]);
        assert_eq!(off, [0x7E, 0x04, 0x04, 0x00, 0x00, 0x00, 0xFF, 0x00, 0xEF]);

        let differing: Vec<usize> = (0..FRAME_LEN).filter(|&i| on[i] != off[i]).collect();
        assert!(differing.iter().all(|i| (3..=6).contains(i)));
    }

    #[test]
    fn test_percent_scaling_truncates() {
        assert_eq!(percent_to_level(0), 0);
        assert_eq!(percent_to_level(1), 2);
        assert_eq!(percent_to_level(50), 127);
        assert_eq!(percent_to_level(99), 252);
        assert_eq!(percent_to_level(100), 255);
        assert_eq!(
            encode_brightness_percent(50),
            encode_brightness(127).unwrap()
        );
    }

    #[test]
    fn test_validate_percent() {
        assert_eq!(validate_percent(0), Ok(0));
        assert_eq!(validate_percent(100), Ok(100));
        assert!(validate_percent(101).is_err());
        assert!(validate_percent(-1).is_err());
    }
}
