//! In-memory transport for tests: records every request and lets the test
//! decide which events come back.

use crate::domain::models::{DeviceId, RadioState};
use crate::infrastructure::bluetooth::transport::{
    BleTransport, PeripheralState, TransportEvent, TransportEventSink, WriteChannel,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan,
    StopScan,
    Connect(DeviceId),
    CancelConnect(DeviceId),
    DiscoverServices(DeviceId, Uuid),
    DiscoverCharacteristics(DeviceId, Uuid, Uuid),
    Write(WriteChannel, Vec<u8>),
}

#[derive(Default)]
struct FakeState {
    radio: RadioState,
    peripherals: HashMap<DeviceId, PeripheralState>,
    calls: Vec<Call>,
    sink: Option<TransportEventSink>,
}

pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

/// Test-side view of a [`FakeTransport`] after it moved into the manager
#[derive(Clone)]
pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new(radio: RadioState) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                radio,
                ..FakeState::default()
            })),
        }
    }

    pub fn handle(&self) -> FakeHandle {
        FakeHandle {
            state: self.state.clone(),
        }
    }

    /// Attach the sink so [`FakeHandle::emit`] can reach the manager
    pub fn with_sink(self, sink: TransportEventSink) -> Self {
        self.state.lock().unwrap().sink = Some(sink);
        self
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl BleTransport for FakeTransport {
    fn radio_state(&self) -> RadioState {
        self.state.lock().unwrap().radio
    }

    fn start_scan(&mut self) {
        self.record(Call::StartScan);
    }

    fn stop_scan(&mut self) {
        self.record(Call::StopScan);
    }

    fn peripheral_state(&self, id: &DeviceId) -> Option<PeripheralState> {
        self.state.lock().unwrap().peripherals.get(id).copied()
    }

    fn connect(&mut self, id: &DeviceId) {
        self.record(Call::Connect(id.clone()));
    }

    fn cancel_connect(&mut self, id: &DeviceId) {
        self.record(Call::CancelConnect(id.clone()));
    }

    fn discover_services(&mut self, id: &DeviceId, service: Uuid) {
        self.record(Call::DiscoverServices(id.clone(), service));
    }

    fn discover_characteristics(&mut self, id: &DeviceId, service: Uuid, characteristic: Uuid) {
        self.record(Call::DiscoverCharacteristics(
            id.clone(),
            service,
            characteristic,
        ));
    }

    fn write_without_response(&mut self, channel: &WriteChannel, bytes: &[u8]) {
        self.record(Call::Write(channel.clone(), bytes.to_vec()));
    }
}

impl FakeHandle {
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Payloads of every write, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Write(_, bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub fn set_peripheral(&self, id: DeviceId, state: PeripheralState) {
        self.state.lock().unwrap().peripherals.insert(id, state);
    }

    pub fn emit(&self, event: TransportEvent) {
        let sink = self.state.lock().unwrap().sink.clone();
        sink.expect("fake transport has no sink").send(event);
    }
}
