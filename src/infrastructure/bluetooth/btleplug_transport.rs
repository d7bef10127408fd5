//! Transport backed by btleplug
//!
//! btleplug is async while [`BleTransport`] is fire-and-forget, so every
//! request is spawned onto the runtime and its outcome comes back to the
//! connection manager as a [`TransportEvent`]. Writes go through a single
//! queue per device to keep frame order.

use crate::domain::models::{DeviceId, RadioState};
use crate::error::TransportError;
use crate::infrastructure::bluetooth::transport::{
    Advertisement, BleTransport, PeripheralState, TransportEvent, TransportEventSink,
    WriteChannel,
};
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Get the first Bluetooth adapter
pub async fn default_adapter() -> anyhow::Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapter found"))
}

fn device_id(id: &PeripheralId) -> DeviceId {
    DeviceId::new(id.to_string())
}

fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

fn transport_error(e: btleplug::Error) -> TransportError {
    match e {
        btleplug::Error::TimedOut(_) => TransportError::timeout(e.to_string()),
        _ => TransportError::other(e.to_string()),
    }
}

/// Peripherals and link states shared with the spawned tasks
#[derive(Default)]
struct Registry {
    radio: RadioState,
    peripherals: HashMap<DeviceId, Peripheral>,
    links: HashMap<DeviceId, PeripheralState>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn set_radio(registry: &SharedRegistry, sink: &TransportEventSink, state: RadioState) {
    if let Ok(mut r) = registry.lock() {
        r.radio = state;
    }
    sink.send(TransportEvent::RadioStateChanged(state));
}

type WriteRequest = (Characteristic, Vec<u8>);

/// One writer per device so frames reach the strip in the order queued.
/// Each write finishes before the next one starts.
struct Writer<T> {
    queue: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Writer<T> {
    fn spawn<F, Fut>(id: DeviceId, sink: TransportEventSink, mut write: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        let (queue, mut rx) = mpsc::unbounded_channel::<T>();
        let task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let error = write(request).await.err();
                sink.send(TransportEvent::WriteCompleted {
                    id: id.clone(),
                    error,
                });
            }
        });
        Self { queue, task }
    }
}

fn peripheral_writer(
    id: DeviceId,
    peripheral: Peripheral,
    sink: TransportEventSink,
) -> Writer<WriteRequest> {
    Writer::spawn(id, sink, move |(characteristic, bytes): WriteRequest| {
        let peripheral = peripheral.clone();
        async move {
            peripheral
                .write(&characteristic, &bytes, WriteType::WithoutResponse)
                .await
                .map_err(transport_error)
        }
    })
}

fn set_link(registry: &SharedRegistry, id: &DeviceId, state: PeripheralState) {
    if let Ok(mut registry) = registry.lock() {
        registry.links.insert(id.clone(), state);
    }
}

pub struct BtleplugTransport {
    adapter: Adapter,
    sink: TransportEventSink,
    registry: SharedRegistry,
    connects: HashMap<DeviceId, JoinHandle<()>>,
    writers: HashMap<DeviceId, Writer<WriteRequest>>,
    event_pump: JoinHandle<()>,
}

impl BtleplugTransport {
    /// Start listening to adapter events. Must be called inside a tokio runtime.
    pub fn new(adapter: Adapter, sink: TransportEventSink) -> Self {
        let registry = SharedRegistry::default();
        let event_pump = tokio::spawn(pump_events(
            adapter.clone(),
            sink.clone(),
            registry.clone(),
        ));

        Self {
            adapter,
            sink,
            registry,
            connects: HashMap::new(),
            writers: HashMap::new(),
            event_pump,
        }
    }

    fn peripheral(&self, id: &DeviceId) -> Option<Peripheral> {
        self.registry
            .lock()
            .ok()
            .and_then(|r| r.peripherals.get(id).cloned())
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.event_pump.abort();
        for (_, task) in self.connects.drain() {
            task.abort();
        }
        for (_, writer) in self.writers.drain() {
            writer.task.abort();
        }
    }
}

async fn pump_events(adapter: Adapter, sink: TransportEventSink, registry: SharedRegistry) {
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            error!("Cannot listen to adapter events: {}", e);
            set_radio(&registry, &sink, RadioState::Unsupported);
            return;
        }
    };

    // Some backends cannot report adapter state; assume a live radio there
    let initial = match adapter.adapter_state().await {
        Ok(state) => radio_state(state),
        Err(e) => {
            debug!("Adapter state unavailable: {}", e);
            RadioState::PoweredOn
        }
    };
    set_radio(&registry, &sink, initial);

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let peripheral = match adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        debug!("Peripheral {} vanished: {}", id, e);
                        continue;
                    }
                };
                let props = peripheral.properties().await.ok().flatten();
                let device = device_id(&id);
                if let Ok(mut r) = registry.lock() {
                    r.peripherals.insert(device.clone(), peripheral);
                }

                let (local_name, service_uuids, rssi) = match props {
                    Some(p) => (p.local_name, p.services, p.rssi),
                    None => (None, Vec::new(), None),
                };
                sink.send(TransportEvent::Discovered(Advertisement {
                    id: device,
                    local_name,
                    service_uuids,
                    rssi,
                }));
            }
            CentralEvent::DeviceConnected(id) => {
                set_link(&registry, &device_id(&id), PeripheralState::Connected);
            }
            CentralEvent::DeviceDisconnected(id) => {
                let device = device_id(&id);
                set_link(&registry, &device, PeripheralState::Disconnected);
                sink.send(TransportEvent::Disconnected {
                    id: device,
                    error: None,
                });
            }
            CentralEvent::StateUpdate(state) => {
                let state = radio_state(state);
                debug!("Radio state changed to {:?}", state);
                set_radio(&registry, &sink, state);
            }
            _ => {}
        }
    }

    warn!("Adapter event stream ended");
}

impl BleTransport for BtleplugTransport {
    fn radio_state(&self) -> RadioState {
        self.registry
            .lock()
            .map(|r| r.radio)
            .unwrap_or(RadioState::Unknown)
    }

    fn start_scan(&mut self) {
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                error!("Failed to start scan: {}", e);
            }
        });
    }

    fn stop_scan(&mut self) {
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
    }

    fn peripheral_state(&self, id: &DeviceId) -> Option<PeripheralState> {
        let registry = self.registry.lock().ok()?;
        if !registry.peripherals.contains_key(id) {
            return None;
        }
        Some(
            registry
                .links
                .get(id)
                .copied()
                .unwrap_or(PeripheralState::Disconnected),
        )
    }

    fn connect(&mut self, id: &DeviceId) {
        let Some(peripheral) = self.peripheral(id) else {
            self.sink.send(TransportEvent::FailedToConnect {
                id: id.clone(),
                error: Some(TransportError::other("peripheral not known to the adapter")),
            });
            return;
        };

        set_link(&self.registry, id, PeripheralState::Connecting);
        let key = id.clone();
        let (id, sink, registry) = (id.clone(), self.sink.clone(), self.registry.clone());
        let task = tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    set_link(&registry, &id, PeripheralState::Connected);
                    sink.send(TransportEvent::Connected(id));
                }
                Err(e) => {
                    set_link(&registry, &id, PeripheralState::Disconnected);
                    sink.send(TransportEvent::FailedToConnect {
                        id,
                        error: Some(transport_error(e)),
                    });
                }
            }
        });
        if let Some(previous) = self.connects.insert(key, task) {
            previous.abort();
        }
    }

    fn cancel_connect(&mut self, id: &DeviceId) {
        if let Some(task) = self.connects.remove(id) {
            task.abort();
        }
        if let Some(writer) = self.writers.remove(id) {
            writer.task.abort();
        }
        let Some(peripheral) = self.peripheral(id) else {
            return;
        };

        set_link(&self.registry, id, PeripheralState::Disconnecting);
        let (id, registry) = (id.clone(), self.registry.clone());
        tokio::spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Disconnect of {} reported: {}", id, e);
            }
            set_link(&registry, &id, PeripheralState::Disconnected);
        });
    }

    fn discover_services(&mut self, id: &DeviceId, _service: Uuid) {
        let Some(peripheral) = self.peripheral(id) else {
            return;
        };
        let (id, sink) = (id.clone(), self.sink.clone());
        tokio::spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral.services().iter().map(|s| s.uuid).collect()),
                Err(e) => Err(transport_error(e)),
            };
            sink.send(TransportEvent::ServicesDiscovered { id, result });
        });
    }

    fn discover_characteristics(&mut self, id: &DeviceId, service: Uuid, _characteristic: Uuid) {
        let Some(peripheral) = self.peripheral(id) else {
            return;
        };

        // btleplug resolves characteristics together with services
        let result = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .map(|s| s.characteristics.iter().map(|c| c.uuid).collect())
            .ok_or_else(|| TransportError::other(format!("service {} not discovered", service)));

        self.sink.send(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service,
            result,
        });
    }

    fn write_without_response(&mut self, channel: &WriteChannel, bytes: &[u8]) {
        let Some(peripheral) = self.peripheral(&channel.device) else {
            warn!("Write to unknown peripheral {}", channel.device);
            return;
        };
        let Some(characteristic) = peripheral.characteristics().into_iter().find(|c| {
            c.uuid == channel.characteristic && c.service_uuid == channel.service
        }) else {
            warn!("Characteristic {} not available", channel.characteristic);
            return;
        };

        let id = &channel.device;
        let mut request = (characteristic, bytes.to_vec());
        if let Some(writer) = self.writers.get(id) {
            match writer.queue.send(request) {
                Ok(()) => return,
                // writer task is gone; start a fresh one below
                Err(mpsc::error::SendError(returned)) => request = returned,
            }
        }

        let writer = peripheral_writer(id.clone(), peripheral, self.sink.clone());
        if writer.queue.send(request).is_err() {
            warn!("Writer for {} stopped before the first frame", id);
        }
        self.writers.insert(id.clone(), writer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_errors_are_classified() {
        let e = transport_error(btleplug::Error::TimedOut(std::time::Duration::from_secs(5)));
        assert!(e.is_timeout());
        let e = transport_error(btleplug::Error::NotConnected);
        assert!(!e.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_keeps_frame_order() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let written = Arc::new(Mutex::new(Vec::new()));
        let log = written.clone();
        // earlier frames take longer, so concurrent writes would land reversed
        let writer = Writer::spawn(
            DeviceId::new("led-1"),
            TransportEventSink::new(tx),
            move |frame: u8| {
                let log = log.clone();
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(u64::from(10 - frame)))
                        .await;
                    log.lock().unwrap().push(frame);
                    if frame == 2 {
                        Err(TransportError::other("busy"))
                    } else {
                        Ok(())
                    }
                }
            },
        );
        for frame in 1..=3 {
            writer.queue.send(frame).unwrap();
        }

        let mut errors = Vec::new();
        for _ in 0..3 {
            match events.recv().await.unwrap() {
                TransportEvent::WriteCompleted { error, .. } => errors.push(error.is_some()),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(*written.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(errors, vec![false, true, false]);
        writer.task.abort();
    }

    #[test]
    fn test_adapter_states_map_to_radio_states() {
        assert_eq!(radio_state(CentralState::PoweredOn), RadioState::PoweredOn);
        assert_eq!(radio_state(CentralState::PoweredOff), RadioState::PoweredOff);
        assert_eq!(radio_state(CentralState::Unknown), RadioState::Unknown);
    }
}
