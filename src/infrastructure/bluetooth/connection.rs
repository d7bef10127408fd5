//! BLE Connection Module
//!
//! Owns the single link to the LED strip. Facade commands, transport
//! events and timer firings all arrive on channels drained by one task,
//! so every phase change happens in order with no locking.

use crate::domain::color::RgbColor;
use crate::domain::models::{
    ConnectionPhase, ConnectionSnapshot, DeviceId, DiscoveredDevice, RadioState, StatusMessage,
};
use crate::domain::settings::{ReconnectPolicy, Settings, SettingsService};
use crate::infrastructure::bluetooth::protocol::{self, CommandFrame};
use crate::infrastructure::bluetooth::scanner::{DeviceFilter, DiscoveredDevices};
use crate::infrastructure::bluetooth::transport::{
    BleTransport, PeripheralState, TransportEvent, WriteChannel,
};
use crate::error::TransportError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Runtime view of the connection-related settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub service_uuid: Uuid,
    pub write_char_uuid: Uuid,
    pub name_patterns: Vec<String>,
    pub show_all_devices: bool,
    pub connection_timeout: Duration,
    pub progress_check_delay: Duration,
    pub service_discovery_watchdog: Duration,
    pub keep_alive_interval: Duration,
    pub initial_heartbeat_delay: Duration,
    pub reconnect_settle_delay: Duration,
    pub reconnect: ReconnectPolicy,
}

/// Shortest delay any timer may be armed with
const MIN_TIMER_MS: u64 = 100;

/// Shortest connection timeout, before the progress check is considered
const MIN_CONNECTION_TIMEOUT_MS: u64 = 1000;

impl ControllerConfig {
    /// Durations from the settings file are raised to safe minimums
    pub fn from_settings(s: &Settings) -> Self {
        let progress_check_ms = at_least("progress_check_delay_ms", s.progress_check_delay_ms, MIN_TIMER_MS);
        let mut reconnect = s.reconnect.clone();
        reconnect.disconnect_retry_delay_ms = at_least(
            "reconnect.disconnect_retry_delay_ms",
            reconnect.disconnect_retry_delay_ms,
            MIN_TIMER_MS,
        );
        reconnect.timeout_retry_delay_ms = at_least(
            "reconnect.timeout_retry_delay_ms",
            reconnect.timeout_retry_delay_ms,
            MIN_TIMER_MS,
        );
        reconnect.failed_connect_retry_delay_ms = at_least(
            "reconnect.failed_connect_retry_delay_ms",
            reconnect.failed_connect_retry_delay_ms,
            MIN_TIMER_MS,
        );

        Self {
            service_uuid: parse_uuid_or(&s.ble_service_uuid, protocol::SERVICE_UUID),
            write_char_uuid: parse_uuid_or(&s.ble_write_char_uuid, protocol::WRITE_CHAR_UUID),
            name_patterns: s.device_name_patterns.clone(),
            show_all_devices: s.show_all_devices,
            connection_timeout: millis(at_least(
                "connection_timeout_ms",
                s.connection_timeout_ms,
                progress_check_ms.max(MIN_CONNECTION_TIMEOUT_MS),
            )),
            progress_check_delay: millis(progress_check_ms),
            service_discovery_watchdog: millis(at_least(
                "service_discovery_watchdog_ms",
                s.service_discovery_watchdog_ms,
                MIN_TIMER_MS,
            )),
            keep_alive_interval: millis(at_least(
                "keep_alive_interval_ms",
                s.keep_alive_interval_ms,
                MIN_TIMER_MS,
            )),
            initial_heartbeat_delay: millis(at_least(
                "initial_heartbeat_delay_ms",
                s.initial_heartbeat_delay_ms,
                MIN_TIMER_MS,
            )),
            reconnect_settle_delay: millis(at_least(
                "reconnect_settle_delay_ms",
                s.reconnect_settle_delay_ms,
                MIN_TIMER_MS,
            )),
            reconnect,
        }
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn at_least(name: &str, value_ms: u64, min_ms: u64) -> u64 {
    if value_ms < min_ms {
        warn!("{} = {} ms is too short, using {} ms", name, value_ms, min_ms);
        min_ms
    } else {
        value_ms
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

fn parse_uuid_or(value: &str, fallback: Uuid) -> Uuid {
    Uuid::parse_str(value).unwrap_or_else(|e| {
        warn!("Invalid UUID {:?} in settings ({}), using {}", value, e, fallback);
        fallback
    })
}

/// Device state to record once a write actually goes out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mirror {
    None,
    Color(RgbColor),
    BrightnessPercent(u8),
}

/// Requests from the facade
#[derive(Debug, Clone)]
pub(crate) enum Command {
    StartScan,
    StopScan,
    SetShowAllDevices(bool),
    Connect(DeviceId),
    Disconnect,
    ReconnectLastKnown,
    Write { frame: CommandFrame, mirror: Mirror },
    /// Move brightness by a signed percentage from the last value sent
    StepBrightness(i16),
    /// A write was refused for lack of a channel
    RequestChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKind {
    ConnectTimeout,
    ProgressCheck,
    SettleConnect,
    DiscoveryWatchdog,
    InitialHeartbeat,
    Heartbeat,
    Reconnect,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerFired {
    kind: TimerKind,
    generation: u64,
}

struct ArmedTimer {
    generation: u64,
    repeating: bool,
    handle: JoinHandle<()>,
}

/// Cancellable timers that report back through the manager's inbox.
///
/// Each arming gets a fresh generation; a firing whose generation is no
/// longer armed is stale and must be ignored.
struct Timers {
    sender: mpsc::UnboundedSender<TimerFired>,
    armed: HashMap<TimerKind, ArmedTimer>,
    next_generation: u64,
}

impl Timers {
    fn new(sender: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            sender,
            armed: HashMap::new(),
            next_generation: 0,
        }
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.spawn(kind, delay, false);
    }

    fn arm_repeating(&mut self, kind: TimerKind, period: Duration) {
        self.spawn(kind, period, true);
    }

    fn spawn(&mut self, kind: TimerKind, period: Duration, repeating: bool) {
        self.cancel(kind);
        self.next_generation += 1;
        let generation = self.next_generation;
        let sender = self.sender.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if sender.send(TimerFired { kind, generation }).is_err() || !repeating {
                    break;
                }
            }
        });

        self.armed.insert(
            kind,
            ArmedTimer {
                generation,
                repeating,
                handle,
            },
        );
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(timer) = self.armed.remove(&kind) {
            timer.handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.handle.abort();
        }
    }

    fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    /// True if the firing belongs to the currently armed timer
    fn accept(&mut self, fired: TimerFired) -> bool {
        match self.armed.get(&fired.kind) {
            Some(timer) if timer.generation == fired.generation => {
                if !timer.repeating {
                    self.armed.remove(&fired.kind);
                }
                true
            }
            _ => false,
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RetryTarget {
    LastKnown,
    Device(DeviceId),
}

/// Connection state machine driven by commands, transport events and timers
pub(crate) struct ConnectionManager<T: BleTransport> {
    transport: T,
    config: ControllerConfig,
    settings: Arc<Mutex<SettingsService>>,
    filter: DeviceFilter,
    discovered: DiscoveredDevices,
    phase: ConnectionPhase,
    radio_state: RadioState,
    scanning: bool,
    target: Option<DiscoveredDevice>,
    channel: Option<WriteChannel>,
    brightness_percent: u8,
    color: RgbColor,
    status: StatusMessage,
    timers: Timers,
    pending_retry: Option<RetryTarget>,
    reconnect_attempts: u32,
    snapshot: watch::Sender<ConnectionSnapshot>,
}

impl<T: BleTransport> ConnectionManager<T> {
    pub(crate) fn new(
        transport: T,
        config: ControllerConfig,
        settings: Arc<Mutex<SettingsService>>,
        timer_sender: mpsc::UnboundedSender<TimerFired>,
        snapshot: watch::Sender<ConnectionSnapshot>,
    ) -> Self {
        let filter = DeviceFilter::new(
            config.service_uuid,
            &config.name_patterns,
            config.show_all_devices,
        );
        let radio_state = transport.radio_state();
        let defaults = ConnectionSnapshot::default();

        Self {
            transport,
            config,
            settings,
            filter,
            discovered: DiscoveredDevices::default(),
            phase: ConnectionPhase::Disconnected,
            radio_state,
            scanning: false,
            target: None,
            channel: None,
            brightness_percent: defaults.current_brightness_percent,
            color: defaults.current_color,
            status: defaults.status,
            timers: Timers::new(timer_sender),
            pending_retry: None,
            reconnect_attempts: 0,
            snapshot,
        }
    }

    /// Serve until the facade drops its command sender
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut timer_events: mpsc::UnboundedReceiver<TimerFired>,
    ) {
        info!(
            "Connection manager started (radio: {:?})",
            self.radio_state
        );
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
                Some(fired) = timer_events.recv() => self.handle_timer(fired),
            }
            self.publish();
        }

        info!("Connection manager shutting down");
        self.disconnect();
        self.stop_scanning();
        self.publish();
    }

    pub(crate) fn handle_command(&mut self, command: Command) {
        debug!("Command: {:?}", command);
        match command {
            Command::StartScan => self.start_scanning(),
            Command::StopScan => self.stop_scanning(),
            Command::SetShowAllDevices(show_all) => self.set_show_all_devices(show_all),
            Command::Connect(id) => {
                self.reset_reconnect();
                self.connect_by_id(&id);
            }
            Command::Disconnect => self.disconnect(),
            Command::ReconnectLastKnown => {
                self.reset_reconnect();
                self.reconnect_to_last_known_device();
            }
            Command::Write { frame, mirror } => self.write_frame(frame, mirror),
            Command::StepBrightness(step) => self.step_brightness(step),
            Command::RequestChannel => self.request_channel(),
        }
    }

    // ---- Scanning ----

    fn start_scanning(&mut self) {
        if self.radio_state != RadioState::PoweredOn {
            warn!("Bluetooth is not powered on ({:?})", self.radio_state);
            self.status = StatusMessage::warning("Bluetooth is not powered on");
            return;
        }

        self.discovered.clear();
        self.transport.start_scan();
        self.scanning = true;
        self.status = StatusMessage::info("Scanning...");
        info!("Scan started - listening to all advertisements");
    }

    fn stop_scanning(&mut self) {
        if self.scanning {
            self.transport.stop_scan();
            self.scanning = false;
            info!("Scan stopped ({} device(s) found)", self.discovered.len());
        }
        if self.phase == ConnectionPhase::Disconnected {
            self.status = StatusMessage::info("Not connected");
        }
    }

    fn set_show_all_devices(&mut self, show_all: bool) {
        if self.filter.show_all_devices == show_all {
            return;
        }
        self.filter.show_all_devices = show_all;
        self.with_settings(|s| s.set_show_all_devices(show_all));

        // Re-filter from scratch
        if self.scanning {
            self.stop_scanning();
            self.start_scanning();
        }
    }

    // ---- Connecting ----

    fn connect_by_id(&mut self, id: &DeviceId) {
        if let Some(device) = self.discovered.get(id).cloned() {
            self.connect(device);
            return;
        }

        if self.transport.peripheral_state(id).is_some() {
            let name = self
                .last_device()
                .filter(|d| &d.id == id)
                .map(|d| d.name)
                .unwrap_or_else(|| id.to_string());
            self.connect(DiscoveredDevice {
                id: id.clone(),
                name,
                signal_strength: None,
            });
            return;
        }

        warn!("Cannot connect to unknown device {}", id);
        self.status = StatusMessage::error("Device not found - scan again");
    }

    fn connect(&mut self, device: DiscoveredDevice) {
        self.stop_scanning();

        if let Some(current) = self.target.clone() {
            if current.id == device.id && self.phase != ConnectionPhase::Disconnected {
                info!(
                    "Already {:?} with {}, ignoring connect",
                    self.phase, current.name
                );
                return;
            }
            if current.id != device.id {
                info!("Abandoning {} to connect to {}", current.name, device.name);
                self.transport.cancel_connect(&current.id);
                self.teardown_link();
                self.target = None;
            }
        }

        let state = self.transport.peripheral_state(&device.id);
        info!("Device state for {}: {:?}", device.name, state);

        match state {
            Some(PeripheralState::Connected) => {
                info!("Device already connected, using existing connection");
                self.target = Some(device);
                self.on_link_established();
            }
            Some(PeripheralState::Connecting) => {
                info!("Device is already connecting, waiting...");
                self.target = Some(device);
                self.set_phase(ConnectionPhase::Connecting);
                self.timers
                    .arm(TimerKind::ConnectTimeout, self.config.connection_timeout);
                self.status = StatusMessage::info("Connecting...");
            }
            Some(PeripheralState::Disconnecting) => {
                info!("Cancelling stale link to {} before reconnecting", device.name);
                self.transport.cancel_connect(&device.id);
                self.target = Some(device);
                self.set_phase(ConnectionPhase::Connecting);
                self.timers
                    .arm(TimerKind::SettleConnect, self.config.reconnect_settle_delay);
                self.status = StatusMessage::info("Connecting...");
            }
            Some(PeripheralState::Disconnected) | None => self.perform_connection(device),
        }
    }

    fn perform_connection(&mut self, device: DiscoveredDevice) {
        info!("Attempting connection to {} ({})", device.name, device.id);
        self.set_phase(ConnectionPhase::Connecting);
        self.timers
            .arm(TimerKind::ConnectTimeout, self.config.connection_timeout);
        self.transport.connect(&device.id);
        self.timers
            .arm(TimerKind::ProgressCheck, self.config.progress_check_delay);
        self.target = Some(device);
        self.status = StatusMessage::info("Connecting...");
    }

    /// Link is up: remember the device and look for the LED service
    fn on_link_established(&mut self) {
        let Some(device) = self.target.clone() else {
            return;
        };

        self.timers.cancel(TimerKind::ConnectTimeout);
        self.timers.cancel(TimerKind::ProgressCheck);
        self.timers.cancel(TimerKind::SettleConnect);

        self.set_phase(ConnectionPhase::ServiceDiscovery);
        self.status = StatusMessage::success("Connected");
        self.with_settings(|s| s.remember_device(&device.id, &device.name));

        info!("Discovering services, looking for {}", self.config.service_uuid);
        self.transport
            .discover_services(&device.id, self.config.service_uuid);
        self.timers.arm(
            TimerKind::DiscoveryWatchdog,
            self.config.service_discovery_watchdog,
        );
    }

    fn disconnect(&mut self) {
        info!("Manually disconnecting");
        self.timers.cancel_all();
        self.reset_reconnect();
        if let Some(device) = self.target.take() {
            self.transport.cancel_connect(&device.id);
        }
        self.set_phase(ConnectionPhase::Disconnected);
        self.status = StatusMessage::info("Not connected");
    }

    fn reconnect_to_last_known_device(&mut self) {
        let Some(last) = self.last_device() else {
            info!("No saved device, scanning instead");
            self.start_scanning();
            return;
        };

        if self.transport.peripheral_state(&last.id).is_some() {
            info!("Reconnecting to saved device {} ({})", last.name, last.id);
            self.connect(DiscoveredDevice {
                id: last.id,
                name: last.name,
                signal_strength: None,
            });
        } else {
            info!("Saved device {} not resolvable, scanning", last.name);
            self.start_scanning();
        }
    }

    // ---- Writing ----

    fn write_frame(&mut self, frame: CommandFrame, mirror: Mirror) {
        let Some(channel) = self.channel.as_ref().filter(|_| self.phase == ConnectionPhase::Ready)
        else {
            warn!("Not connected - dropping {:?}", frame);
            self.request_channel();
            return;
        };

        trace!("Writing {:?}", frame);
        self.transport
            .write_without_response(channel, frame.as_bytes());

        match mirror {
            Mirror::None => {}
            Mirror::Color(color) => self.color = color,
            Mirror::BrightnessPercent(percent) => self.brightness_percent = percent,
        }
    }

    fn step_brightness(&mut self, step: i16) {
        let percent = (i16::from(self.brightness_percent) + step).clamp(0, 100) as u8;
        debug!("Brightness {}% -> {}%", self.brightness_percent, percent);
        self.write_frame(
            protocol::encode_brightness_percent(percent),
            Mirror::BrightnessPercent(percent),
        );
    }

    /// Re-run discovery when linked but the channel is missing
    fn request_channel(&mut self) {
        if self.channel.is_some() || !self.phase.is_linked() {
            return;
        }
        let Some(device) = self.target.clone() else {
            return;
        };
        warn!("Write characteristic not available yet - rediscovering services");
        self.set_phase(ConnectionPhase::ServiceDiscovery);
        self.transport
            .discover_services(&device.id, self.config.service_uuid);
    }

    fn start_keep_alive(&mut self) {
        info!(
            "Keep-alive started (interval: {:?})",
            self.config.keep_alive_interval
        );
        self.timers
            .arm_repeating(TimerKind::Heartbeat, self.config.keep_alive_interval);
    }

    fn send_heartbeat(&mut self) {
        let frame = protocol::encode_brightness_percent(self.brightness_percent);
        trace!("Keep-alive at {}%", self.brightness_percent);
        self.write_frame(frame, Mirror::None);
    }

    // ---- Transport events ----

    pub(crate) fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::RadioStateChanged(state) => self.on_radio_state(state),
            TransportEvent::Discovered(adv) => {
                if !self.scanning {
                    trace!("Advertisement from {} outside a scan", adv.id);
                    return;
                }
                self.discovered.admit(&self.filter, &adv);
            }
            TransportEvent::Connected(id) => self.on_connected(id),
            TransportEvent::FailedToConnect { id, error } => self.on_failed_to_connect(id, error),
            TransportEvent::Disconnected { id, error } => self.on_disconnected(id, error),
            TransportEvent::ServicesDiscovered { id, result } => {
                self.on_services_discovered(id, result)
            }
            TransportEvent::CharacteristicsDiscovered {
                id,
                service,
                result,
            } => self.on_characteristics_discovered(id, service, result),
            TransportEvent::WriteCompleted { id, error } => match error {
                Some(e) => warn!("Write to {} failed: {} (keeping connection)", id, e),
                None => trace!("Write to {} completed", id),
            },
        }
    }

    fn is_target(&self, id: &DeviceId) -> bool {
        self.target.as_ref().is_some_and(|t| &t.id == id)
    }

    fn on_radio_state(&mut self, state: RadioState) {
        info!("Bluetooth state: {:?}", state);
        self.radio_state = state;

        match state {
            RadioState::PoweredOn => {
                if self.phase == ConnectionPhase::Disconnected {
                    self.reconnect_to_last_known_device();
                }
            }
            RadioState::PoweredOff | RadioState::Unauthorized | RadioState::Unsupported => {
                self.scanning = false;
                if self.phase != ConnectionPhase::Disconnected {
                    self.timers.cancel_all();
                    self.reset_reconnect();
                    self.target = None;
                    self.set_phase(ConnectionPhase::Disconnected);
                }
                self.status = StatusMessage::error(match state {
                    RadioState::PoweredOff => "Bluetooth is off",
                    RadioState::Unauthorized => "Bluetooth permission required",
                    _ => "Bluetooth is not supported",
                });
            }
            RadioState::Unknown => {}
        }
    }

    fn on_connected(&mut self, id: DeviceId) {
        if !self.is_target(&id) {
            warn!("Unexpected connection from {}, cancelling it", id);
            self.transport.cancel_connect(&id);
            return;
        }
        if self.phase.is_linked() {
            debug!("Duplicate connected event for {}", id);
            return;
        }

        info!("Connected to {}", id);
        self.on_link_established();
    }

    fn on_failed_to_connect(&mut self, id: DeviceId, error: Option<TransportError>) {
        if !self.is_target(&id) {
            debug!("Ignoring connect failure for non-target {}", id);
            return;
        }

        match &error {
            Some(e) => error!("Failed to connect to {}: {}", id, e),
            None => error!("Failed to connect to {}: unknown error", id),
        }
        self.teardown_link();
        self.target = None;
        self.status = StatusMessage::error("Connection failed");

        if error.as_ref().is_some_and(TransportError::is_timeout) {
            let delay = Duration::from_millis(self.config.reconnect.failed_connect_retry_delay_ms);
            self.schedule_retry(RetryTarget::Device(id), delay);
        }
    }

    fn on_disconnected(&mut self, id: DeviceId, error: Option<TransportError>) {
        if !self.is_target(&id) {
            debug!("Ignoring disconnect from non-target {}", id);
            return;
        }

        info!("Disconnected from {}", id);
        self.teardown_link();
        self.target = None;

        match error {
            None => {
                info!("Disconnected without error (out of range or turned off)");
                self.status = StatusMessage::info("Not connected");
                let delay = Duration::from_millis(self.config.reconnect.disconnect_retry_delay_ms);
                self.schedule_retry(RetryTarget::LastKnown, delay);
            }
            Some(e) if e.is_timeout() => {
                warn!("Disconnect error: {}", e);
                self.status = StatusMessage::error(format!("Connection error: {}", e.message));
                let delay = Duration::from_millis(self.config.reconnect.timeout_retry_delay_ms);
                self.schedule_retry(RetryTarget::LastKnown, delay);
            }
            Some(e) => {
                warn!("Disconnect error: {}", e);
                self.status = StatusMessage::error(format!("Connection error: {}", e.message));
            }
        }
    }

    fn on_services_discovered(&mut self, id: DeviceId, result: Result<Vec<Uuid>, TransportError>) {
        if !self.is_target(&id) || self.phase != ConnectionPhase::ServiceDiscovery {
            debug!("Ignoring services from {} in {:?}", id, self.phase);
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(e) => {
                error!("Service discovery error: {}", e);
                return;
            }
        };
        if services.is_empty() {
            warn!("No services found");
            return;
        }

        info!("Found {} service(s)", services.len());
        if services.contains(&self.config.service_uuid) {
            info!("Found target service, discovering characteristics...");
            self.set_phase(ConnectionPhase::CharacteristicDiscovery);
            self.transport.discover_characteristics(
                &id,
                self.config.service_uuid,
                self.config.write_char_uuid,
            );
        } else {
            warn!("Target service not found. Available: {:?}", services);
            self.status = StatusMessage::warning("Connected (LED service not found)");
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        id: DeviceId,
        service: Uuid,
        result: Result<Vec<Uuid>, TransportError>,
    ) {
        if !self.is_target(&id) || self.phase != ConnectionPhase::CharacteristicDiscovery {
            debug!("Ignoring characteristics from {} in {:?}", id, self.phase);
            return;
        }

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                error!("Characteristic discovery error: {}", e);
                return;
            }
        };

        if service != self.config.service_uuid
            || !characteristics.contains(&self.config.write_char_uuid)
        {
            warn!(
                "Write characteristic not found. Available: {:?}",
                characteristics
            );
            self.status = StatusMessage::warning("Connected (characteristic not found)");
            return;
        }

        info!("Found write characteristic - ready to send commands");
        self.channel = Some(WriteChannel {
            device: id,
            service,
            characteristic: self.config.write_char_uuid,
        });
        self.set_phase(ConnectionPhase::Ready);
        self.status = StatusMessage::success("Connected and ready");
        self.reset_reconnect();
        self.timers.cancel(TimerKind::DiscoveryWatchdog);

        self.start_keep_alive();
        self.timers.arm(
            TimerKind::InitialHeartbeat,
            self.config.initial_heartbeat_delay,
        );
    }

    // ---- Timers ----

    pub(crate) fn handle_timer(&mut self, fired: TimerFired) {
        if !self.timers.accept(fired) {
            trace!("Stale {:?} timer ignored", fired.kind);
            return;
        }

        match fired.kind {
            TimerKind::ConnectTimeout => self.on_connect_timeout(),
            TimerKind::ProgressCheck => {
                if let Some(device) = self.target.as_ref() {
                    if self.phase == ConnectionPhase::Connecting {
                        info!(
                            "Connection progress check: {} is {:?} after {:?}",
                            device.name,
                            self.transport.peripheral_state(&device.id),
                            self.config.progress_check_delay
                        );
                    }
                }
            }
            TimerKind::SettleConnect => {
                if self.phase == ConnectionPhase::Connecting {
                    if let Some(device) = self.target.clone() {
                        self.perform_connection(device);
                    }
                }
            }
            TimerKind::DiscoveryWatchdog => {
                if self.phase.is_linked() && self.channel.is_none() {
                    warn!("Service discovery timeout - characteristic not found yet");
                }
            }
            TimerKind::InitialHeartbeat => {
                if self.phase == ConnectionPhase::Ready {
                    info!("Sending initial keep-alive");
                    self.send_heartbeat();
                }
            }
            TimerKind::Heartbeat => {
                if self.phase == ConnectionPhase::Ready && self.channel.is_some() {
                    self.send_heartbeat();
                } else {
                    info!("Stopping keep-alive - connection lost");
                    self.timers.cancel(TimerKind::Heartbeat);
                }
            }
            TimerKind::Reconnect => self.on_reconnect_due(),
        }
    }

    fn on_connect_timeout(&mut self) {
        if self.phase != ConnectionPhase::Connecting {
            return;
        }
        warn!(
            "Connection timeout after {:?}",
            self.config.connection_timeout
        );
        if let Some(device) = self.target.take() {
            self.transport.cancel_connect(&device.id);
        }
        self.teardown_link();
        self.status = StatusMessage::error("Connection timed out - device not responding");
    }

    fn schedule_retry(&mut self, target: RetryTarget, delay: Duration) {
        if let Some(max) = self.config.reconnect.max_attempts {
            if self.reconnect_attempts >= max {
                warn!("Giving up after {} reconnect attempt(s)", self.reconnect_attempts);
                self.status = StatusMessage::error("Reconnect failed - select the device again");
                return;
            }
        }
        info!("Attempting to reconnect in {:?}", delay);
        self.pending_retry = Some(target);
        self.timers.arm(TimerKind::Reconnect, delay);
    }

    fn on_reconnect_due(&mut self) {
        let Some(target) = self.pending_retry.take() else {
            return;
        };
        if self.phase != ConnectionPhase::Disconnected {
            debug!("Connection already in progress, skipping reconnect");
            return;
        }

        self.reconnect_attempts += 1;
        info!("Reconnect attempt {}", self.reconnect_attempts);

        match target {
            RetryTarget::LastKnown => self.reconnect_to_last_known_device(),
            RetryTarget::Device(id) => match self.discovered.get(&id).cloned() {
                Some(device) => self.connect(device),
                None => warn!("Device {} no longer listed, not retrying", id),
            },
        }
    }

    fn reset_reconnect(&mut self) {
        self.reconnect_attempts = 0;
        self.pending_retry = None;
        self.timers.cancel(TimerKind::Reconnect);
    }

    // ---- State helpers ----

    /// Drop every per-link timer and fall back to `Disconnected`
    fn teardown_link(&mut self) {
        for kind in [
            TimerKind::ConnectTimeout,
            TimerKind::ProgressCheck,
            TimerKind::SettleConnect,
            TimerKind::DiscoveryWatchdog,
            TimerKind::InitialHeartbeat,
        ] {
            self.timers.cancel(kind);
        }
        self.set_phase(ConnectionPhase::Disconnected);
    }

    /// The channel only exists while `Ready`; leaving it stops the heartbeat
    fn set_phase(&mut self, phase: ConnectionPhase) {
        if phase != self.phase {
            debug!("Phase {:?} -> {:?}", self.phase, phase);
        }
        self.phase = phase;
        if phase != ConnectionPhase::Ready {
            self.channel = None;
            if self.timers.is_armed(TimerKind::Heartbeat) {
                info!("Keep-alive stopped");
                self.timers.cancel(TimerKind::Heartbeat);
            }
        }
    }

    fn last_device(&self) -> Option<crate::domain::settings::LastDevice> {
        match self.settings.lock() {
            Ok(settings) => settings.get().last_device.clone(),
            Err(_) => {
                error!("Settings lock poisoned");
                None
            }
        }
    }

    fn with_settings(&self, f: impl FnOnce(&mut SettingsService) -> anyhow::Result<()>) {
        match self.settings.lock() {
            Ok(mut settings) => {
                if let Err(e) = f(&mut settings) {
                    warn!("Failed to save settings: {}", e);
                }
            }
            Err(_) => error!("Settings lock poisoned"),
        }
    }

    fn publish(&self) {
        let next = ConnectionSnapshot {
            phase: self.phase,
            radio_state: self.radio_state,
            is_scanning: self.scanning,
            status: self.status.clone(),
            discovered_devices: self.discovered.to_vec(),
            device_name: self.target.as_ref().map(|t| t.name.clone()),
            current_brightness_percent: self.brightness_percent,
            current_color: self.color,
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
