use crate::domain::color::RgbColor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform-stable peripheral identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A device admitted to the list during a scan window.
///
/// The transport keeps the platform peripheral object; `id` is the handle
/// used to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    pub name: String,
    pub signal_strength: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    /// Connect requested, waiting for the link
    Connecting,
    /// Linked, looking for the LED service
    ServiceDiscovery,
    /// Service found, looking for the write characteristic
    CharacteristicDiscovery,
    /// Write channel available
    Ready,
}

impl ConnectionPhase {
    /// The radio link is up, whether or not the channel is known yet
    pub fn is_linked(self) -> bool {
        matches!(
            self,
            Self::ServiceDiscovery | Self::CharacteristicDiscovery | Self::Ready
        )
    }
}

/// Power state of the host radio as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioState {
    #[default]
    Unknown,
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: MessageSeverity::Info,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: MessageSeverity::Success,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: MessageSeverity::Warning,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: MessageSeverity::Error,
        }
    }
}

/// Brightness presets offered to shortcut consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrightnessLevel {
    VeryLow,
    Low,
    Medium,
    High,
    Max,
}

impl BrightnessLevel {
    pub const STEP_PERCENT: u8 = 20;

    pub fn percent(self) -> u8 {
        match self {
            Self::VeryLow => 20,
            Self::Low => 40,
            Self::Medium => 60,
            Self::High => 80,
            Self::Max => 100,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "verylow" | "very-low" | "very_low" => Some(Self::VeryLow),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

/// Read-only view of the connection published to UI and shortcut consumers
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub phase: ConnectionPhase,
    pub radio_state: RadioState,
    pub is_scanning: bool,
    pub status: StatusMessage,
    pub discovered_devices: Vec<DiscoveredDevice>,
    /// Name of the target device while one is set
    pub device_name: Option<String>,
    pub current_brightness_percent: u8,
    pub current_color: RgbColor,
}

impl ConnectionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.phase.is_linked()
    }

    pub fn is_connecting(&self) -> bool {
        self.phase == ConnectionPhase::Connecting
    }

    pub fn is_ready(&self) -> bool {
        self.phase == ConnectionPhase::Ready
    }

    pub fn connection_status_text(&self) -> &str {
        &self.status.message
    }
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            radio_state: RadioState::Unknown,
            is_scanning: false,
            status: StatusMessage::info("Not connected"),
            discovered_devices: Vec::new(),
            device_name: None,
            current_brightness_percent: 100,
            current_color: RgbColor::WHITE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linked_phases() {
        assert!(!ConnectionPhase::Disconnected.is_linked());
        assert!(!ConnectionPhase::Connecting.is_linked());
        assert!(ConnectionPhase::ServiceDiscovery.is_linked());
        assert!(ConnectionPhase::Ready.is_linked());
    }

    #[test]
    fn test_default_snapshot() {
        let snapshot = ConnectionSnapshot::default();
        assert!(!snapshot.is_connected());
        assert!(!snapshot.is_connecting());
        assert_eq!(snapshot.current_brightness_percent, 100);
        assert_eq!(snapshot.current_color, RgbColor::WHITE);
        assert_eq!(snapshot.connection_status_text(), "Not connected");
    }

    #[test]
    fn test_brightness_presets() {
        assert_eq!(BrightnessLevel::VeryLow.percent(), 20);
        assert_eq!(BrightnessLevel::Max.percent(), 100);
        assert_eq!(BrightnessLevel::from_name("Medium"), Some(BrightnessLevel::Medium));
        assert_eq!(BrightnessLevel::from_name("blinding"), None);
    }
}
