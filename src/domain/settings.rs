use crate::domain::models::DeviceId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const APP_DIR: &str = "LedStripController";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "led_strip_controller".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Peripheral remembered for auto-reconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastDevice {
    pub id: DeviceId,
    pub name: String,
}

/// Automatic reconnect behaviour after a dropped link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before reconnecting after a disconnect that carried no error
    #[serde(default = "default_disconnect_retry_delay_ms")]
    pub disconnect_retry_delay_ms: u64,
    /// Delay before reconnecting after a disconnect with a timeout error
    #[serde(default = "default_timeout_retry_delay_ms")]
    pub timeout_retry_delay_ms: u64,
    /// Delay before retrying a connect that failed with a timeout error
    #[serde(default = "default_failed_connect_retry_delay_ms")]
    pub failed_connect_retry_delay_ms: u64,
    /// Consecutive automatic attempts before giving up; `None` retries forever
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            disconnect_retry_delay_ms: default_disconnect_retry_delay_ms(),
            timeout_retry_delay_ms: default_timeout_retry_delay_ms(),
            failed_connect_retry_delay_ms: default_failed_connect_retry_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_disconnect_retry_delay_ms() -> u64 {
    3000
}
fn default_timeout_retry_delay_ms() -> u64 {
    2000
}
fn default_failed_connect_retry_delay_ms() -> u64 {
    2000
}
fn default_max_attempts() -> Option<u32> {
    Some(5)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // BLE Profile
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_write_uuid")]
    pub ble_write_char_uuid: String,

    // Scan filtering
    #[serde(default = "default_false")]
    pub show_all_devices: bool,
    #[serde(default = "default_name_patterns")]
    pub device_name_patterns: Vec<String>,

    // Connection timing
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_progress_check_delay_ms")]
    pub progress_check_delay_ms: u64,
    #[serde(default = "default_service_discovery_watchdog_ms")]
    pub service_discovery_watchdog_ms: u64,
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    #[serde(default = "default_initial_heartbeat_delay_ms")]
    pub initial_heartbeat_delay_ms: u64,
    #[serde(default = "default_reconnect_settle_delay_ms")]
    pub reconnect_settle_delay_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    // Auto-reconnect target
    #[serde(default)]
    pub last_device: Option<LastDevice>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            ble_service_uuid: default_service_uuid(),
            ble_write_char_uuid: default_write_uuid(),
            show_all_devices: false,
            device_name_patterns: default_name_patterns(),
            connection_timeout_ms: default_connection_timeout_ms(),
            progress_check_delay_ms: default_progress_check_delay_ms(),
            service_discovery_watchdog_ms: default_service_discovery_watchdog_ms(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            initial_heartbeat_delay_ms: default_initial_heartbeat_delay_ms(),
            reconnect_settle_delay_ms: default_reconnect_settle_delay_ms(),
            reconnect: ReconnectPolicy::default(),
            last_device: None,
        }
    }
}

fn default_service_uuid() -> String {
    "0000fff0-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_write_uuid() -> String {
    "0000fff3-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_name_patterns() -> Vec<String> {
    [
        "ELK-BLEDOM",
        "Lotus",
        "LED",
        "BLEDOM",
        "BLE",
        "RGB",
        "Light",
        "Lamp",
        "MELK",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}
fn default_connection_timeout_ms() -> u64 {
    30_000
}
fn default_progress_check_delay_ms() -> u64 {
    2000
}
fn default_service_discovery_watchdog_ms() -> u64 {
    5000
}
fn default_keep_alive_interval_ms() -> u64 {
    2000
}
fn default_initial_heartbeat_delay_ms() -> u64 {
    500
}
fn default_reconnect_settle_delay_ms() -> u64 {
    1000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: Option<PathBuf>,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file; a missing or corrupt file yields defaults
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                if settings_path.exists() {
                    warn!("Ignoring unreadable settings {:?}: {}", settings_path, e);
                }
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path: Some(settings_path),
        }
    }

    /// Settings that are never written to disk
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            settings,
            settings_path: None,
        }
    }

    /// Directory holding settings and favorites
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push(APP_DIR);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.settings_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn remember_device(&mut self, id: &DeviceId, name: &str) -> anyhow::Result<()> {
        let device = LastDevice {
            id: id.clone(),
            name: name.to_string(),
        };
        if self.settings.last_device.as_ref() == Some(&device) {
            return Ok(());
        }
        info!("Remembering {} ({}) for auto-reconnect", name, id);
        self.settings.last_device = Some(device);
        self.save()
    }

    pub fn set_show_all_devices(&mut self, show_all: bool) -> anyhow::Result<()> {
        self.settings.show_all_devices = show_all;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.connection_timeout_ms, 30_000);
        assert_eq!(s.keep_alive_interval_ms, 2000);
        assert_eq!(s.reconnect.max_attempts, Some(5));
        assert!(s.device_name_patterns.iter().any(|p| p == "MELK"));
        assert!(s.last_device.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let s: Settings = serde_json::from_str(r#"{ "show_all_devices": true }"#).unwrap();
        assert!(s.show_all_devices);
        assert_eq!(s.ble_write_char_uuid, default_write_uuid());
        assert_eq!(s.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn test_remember_device_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "led_strip_controller_settings_{}",
            std::process::id()
        ));
        let path = dir.join("settings.json");
        let _ = fs::remove_file(&path);

        let mut service = SettingsService::from_path(path.clone());
        service
            .remember_device(&DeviceId::new("AA:BB"), "ELK-BLEDOM")
            .unwrap();

        let reloaded = SettingsService::from_path(path);
        assert_eq!(
            reloaded.get().last_device,
            Some(LastDevice {
                id: DeviceId::new("AA:BB"),
                name: "ELK-BLEDOM".to_string(),
            })
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!(
            "led_strip_controller_corrupt_{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let service = SettingsService::from_path(path);
        assert!(service.get().last_device.is_none());
        assert!(!service.get().show_all_devices);

        let _ = fs::remove_dir_all(&dir);
    }
}
