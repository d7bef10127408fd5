//! BLE Scanner Module
//!
//! Decides which advertisements belong in the device list. The radio scan
//! itself is unfiltered because many strips omit the service UUID from
//! their advertisements.

use crate::domain::models::{DeviceId, DiscoveredDevice};
use crate::infrastructure::bluetooth::transport::Advertisement;
use tracing::{debug, info};
use uuid::Uuid;

const UNKNOWN_NAME: &str = "Unknown device";

/// Admission rule for advertisements
#[derive(Debug, Clone)]
pub struct DeviceFilter {
    pub service_uuid: Uuid,
    /// Matched as case-insensitive substrings of the advertised name
    pub name_patterns: Vec<String>,
    pub show_all_devices: bool,
}

impl DeviceFilter {
    pub fn new(service_uuid: Uuid, name_patterns: &[String], show_all_devices: bool) -> Self {
        Self {
            service_uuid,
            name_patterns: name_patterns.iter().map(|p| p.to_lowercase()).collect(),
            show_all_devices,
        }
    }

    /// Show-all, or advertises the target service, or has a known name
    pub fn admits(&self, adv: &Advertisement) -> bool {
        self.show_all_devices
            || adv.service_uuids.contains(&self.service_uuid)
            || self.matches_name(adv.local_name.as_deref())
    }

    pub fn matches_name(&self, name: Option<&str>) -> bool {
        let Some(name) = name else {
            return false;
        };
        let name = name.to_lowercase();
        self.name_patterns.iter().any(|p| name.contains(p.as_str()))
    }
}

/// Devices collected during the current scan window
#[derive(Debug, Default)]
pub struct DiscoveredDevices {
    devices: Vec<DiscoveredDevice>,
}

impl DiscoveredDevices {
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Add the advertiser if the filter admits it and it is not listed yet.
    ///
    /// Returns true when the list changed.
    pub fn admit(&mut self, filter: &DeviceFilter, adv: &Advertisement) -> bool {
        if !filter.admits(adv) {
            debug!("Ignoring advertisement from {} ({:?})", adv.id, adv.local_name);
            return false;
        }
        if self.get(&adv.id).is_some() {
            return false;
        }

        let name = match adv.local_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => UNKNOWN_NAME.to_string(),
        };
        info!(
            "Found device: {} - id: {} - RSSI: {:?}",
            name, adv.id, adv.rssi
        );
        self.devices.push(DiscoveredDevice {
            id: adv.id.clone(),
            name,
            signal_strength: adv.rssi,
        });
        true
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DiscoveredDevice> {
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn to_vec(&self) -> Vec<DiscoveredDevice> {
        self.devices.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::Settings;
    use crate::infrastructure::bluetooth::protocol::SERVICE_UUID;

    fn filter(show_all: bool) -> DeviceFilter {
        DeviceFilter::new(
            SERVICE_UUID,
            &Settings::default().device_name_patterns,
            show_all,
        )
    }

    fn adv(id: &str, name: Option<&str>, services: Vec<Uuid>) -> Advertisement {
        Advertisement {
            id: DeviceId::new(id),
            local_name: name.map(str::to_string),
            service_uuids: services,
            rssi: Some(-60),
        }
    }

    #[test]
    fn test_name_pattern_admits_without_service() {
        assert!(filter(false).admits(&adv("1", Some("MELK-100"), vec![])));
        assert!(filter(false).admits(&adv("2", Some("elk-bledom04"), vec![])));
    }

    #[test]
    fn test_unrelated_name_rejected() {
        assert!(!filter(false).admits(&adv("1", Some("Speaker"), vec![])));
        assert!(!filter(false).admits(&adv("2", None, vec![])));
    }

    #[test]
    fn test_service_uuid_admits_any_name() {
        assert!(filter(false).admits(&adv("1", Some("Speaker"), vec![SERVICE_UUID])));
        assert!(filter(false).admits(&adv("2", None, vec![SERVICE_UUID])));
    }

    #[test]
    fn test_show_all_admits_everything() {
        assert!(filter(true).admits(&adv("1", Some("Speaker"), vec![])));
        assert!(filter(true).admits(&adv("2", None, vec![])));
    }

    #[test]
    fn test_duplicates_rejected_by_identity() {
        let f = filter(false);
        let mut list = DiscoveredDevices::default();
        assert!(list.admit(&f, &adv("1", Some("MELK-100"), vec![])));
        assert!(!list.admit(&f, &adv("1", Some("MELK-100 renamed"), vec![])));
        assert!(list.admit(&f, &adv("2", None, vec![SERVICE_UUID])));
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(&DeviceId::new("1")).unwrap().name, "MELK-100");
        assert_eq!(list.get(&DeviceId::new("2")).unwrap().name, UNKNOWN_NAME);

        list.clear();
        assert!(list.is_empty());
    }
}
