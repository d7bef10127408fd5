//! BLE Transport Boundary
//!
//! The connection manager drives the radio through [`BleTransport`] and
//! learns about results only through [`TransportEvent`]s pushed into a
//! [`TransportEventSink`]. Every request is fire-and-forget.

use crate::domain::models::{DeviceId, RadioState};
use crate::error::TransportError;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Link state of one peripheral as the transport currently sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A single advertisement seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: DeviceId,
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub rssi: Option<i16>,
}

/// The writable target characteristic on a linked peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteChannel {
    pub device: DeviceId,
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Callbacks from the radio, consumed by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    RadioStateChanged(RadioState),
    Discovered(Advertisement),
    Connected(DeviceId),
    FailedToConnect {
        id: DeviceId,
        error: Option<TransportError>,
    },
    Disconnected {
        id: DeviceId,
        error: Option<TransportError>,
    },
    ServicesDiscovered {
        id: DeviceId,
        result: Result<Vec<Uuid>, TransportError>,
    },
    CharacteristicsDiscovered {
        id: DeviceId,
        service: Uuid,
        result: Result<Vec<Uuid>, TransportError>,
    },
    WriteCompleted {
        id: DeviceId,
        error: Option<TransportError>,
    },
}

/// Narrow capability the connection manager needs from a BLE stack.
///
/// Implementations must not block: long operations are started here and
/// their outcome is reported later as a [`TransportEvent`].
pub trait BleTransport: Send + 'static {
    fn radio_state(&self) -> RadioState;

    /// Unfiltered scan; admission is decided by the connection manager
    fn start_scan(&mut self);

    fn stop_scan(&mut self);

    /// Resolve a known peripheral without scanning
    fn peripheral_state(&self, id: &DeviceId) -> Option<PeripheralState>;

    fn connect(&mut self, id: &DeviceId);

    fn cancel_connect(&mut self, id: &DeviceId);

    fn discover_services(&mut self, id: &DeviceId, service: Uuid);

    fn discover_characteristics(&mut self, id: &DeviceId, service: Uuid, characteristic: Uuid);

    fn write_without_response(&mut self, channel: &WriteChannel, bytes: &[u8]);
}

/// Cloneable handle a transport uses to report events
#[derive(Clone)]
pub struct TransportEventSink {
    sender: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEventSink {
    pub(crate) fn new(sender: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { sender }
    }

    pub fn send(&self, event: TransportEvent) {
        if self.sender.send(event).is_err() {
            warn!("Connection manager is gone, dropping transport event");
        }
    }
}
