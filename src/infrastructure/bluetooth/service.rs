//! LED Controller Service
//!
//! Public facade used by the CLI and shortcut consumers. Validates input,
//! encodes frames and hands them to the connection manager task. Reads go
//! through the latest published [`ConnectionSnapshot`].

use crate::domain::color::{LedColor, RgbColor};
use crate::domain::favorites::FavoritesStore;
use crate::domain::models::{BrightnessLevel, ConnectionSnapshot, DeviceId, DiscoveredDevice};
use crate::domain::settings::SettingsService;
use crate::error::{LedError, Result};
use crate::infrastructure::bluetooth::connection::{
    Command, ConnectionManager, ControllerConfig, Mirror,
};
use crate::infrastructure::bluetooth::protocol::{self, CommandFrame};
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportEventSink};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a running connection manager
pub struct LedController {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    favorites: Mutex<FavoritesStore>,
    task: JoinHandle<()>,
}

impl LedController {
    /// Spawn the connection manager on the current tokio runtime.
    ///
    /// `make_transport` receives the sink the transport must report its
    /// events to.
    pub fn spawn<T, F>(
        settings: Arc<Mutex<SettingsService>>,
        favorites: FavoritesStore,
        make_transport: F,
    ) -> Result<Self>
    where
        T: BleTransport,
        F: FnOnce(TransportEventSink) -> T,
    {
        let config = {
            let settings = settings
                .lock()
                .map_err(|_| LedError::PersistenceCorruption("settings lock poisoned".into()))?;
            ControllerConfig::from_settings(settings.get())
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ConnectionSnapshot::default());

        let transport = make_transport(TransportEventSink::new(event_tx));
        let manager = ConnectionManager::new(transport, config, settings, timer_tx, snapshot_tx);
        let task = tokio::spawn(manager.run(command_rx, event_rx, timer_rx));

        info!("LED controller started");
        Ok(Self {
            commands: command_tx,
            snapshot: snapshot_rx,
            favorites: Mutex::new(favorites),
            task,
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| LedError::ControllerStopped)
    }

    // ---- Scanning and connection ----

    pub fn start_scanning(&self) -> Result<()> {
        self.send(Command::StartScan)
    }

    pub fn stop_scanning(&self) -> Result<()> {
        self.send(Command::StopScan)
    }

    pub fn set_show_all_devices(&self, show_all: bool) -> Result<()> {
        self.send(Command::SetShowAllDevices(show_all))
    }

    pub fn connect(&self, id: impl Into<DeviceId>) -> Result<()> {
        self.send(Command::Connect(id.into()))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    pub fn reconnect_to_last_known_device(&self) -> Result<()> {
        self.send(Command::ReconnectLastKnown)
    }

    /// Wait up to `grace` for a writable channel, reconnecting if needed
    pub async fn ensure_connected(&self, grace: Duration) -> Result<()> {
        if self.snapshot.borrow().is_ready() {
            return Ok(());
        }

        info!("Not ready, reconnecting to last device");
        self.reconnect_to_last_known_device()?;

        let mut rx = self.snapshot.clone();
        let outcome = tokio::time::timeout(grace, rx.wait_for(ConnectionSnapshot::is_ready))
            .await
            .map(|ready| ready.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(LedError::ControllerStopped),
            Err(_) if rx.borrow().is_connecting() => Err(LedError::ConnectionTimeout(grace)),
            Err(_) => Err(LedError::NotConnected),
        }
    }

    // ---- Device commands ----

    /// Queue a device command if a channel is ready; otherwise ask for one and fail
    fn send_when_ready(&self, command: Command) -> Result<()> {
        if !self.snapshot.borrow().is_ready() {
            warn!("Not connected - command {:?} not sent", command);
            self.send(Command::RequestChannel)?;
            return Err(LedError::NotConnected);
        }
        debug!("Queueing {:?}", command);
        self.send(command)
    }

    fn write(&self, frame: CommandFrame, mirror: Mirror) -> Result<()> {
        self.send_when_ready(Command::Write { frame, mirror })
    }

    pub fn set_color(&self, r: i32, g: i32, b: i32) -> Result<()> {
        let frame = protocol::encode_color(r, g, b)?;
        let color = RgbColor::new(r, g, b)?;
        self.write(frame, Mirror::Color(color))
    }

    pub fn set_rgb(&self, color: RgbColor) -> Result<()> {
        self.write(protocol::encode_rgb(color), Mirror::Color(color))
    }

    pub fn set_named_color(&self, color: LedColor) -> Result<()> {
        self.set_rgb(color.to_rgb())
    }

    /// Set brightness from a 0-100 percentage
    pub fn set_brightness(&self, percent: i32) -> Result<()> {
        let percent = protocol::validate_percent(percent)?;
        self.write(
            protocol::encode_brightness_percent(percent),
            Mirror::BrightnessPercent(percent),
        )
    }

    pub fn set_brightness_level(&self, level: BrightnessLevel) -> Result<()> {
        self.set_brightness(i32::from(level.percent()))
    }

    /// Steps apply to the last brightness sent, so queued steps accumulate
    pub fn increase_brightness(&self) -> Result<()> {
        self.send_when_ready(Command::StepBrightness(i16::from(
            BrightnessLevel::STEP_PERCENT,
        )))
    }

    pub fn decrease_brightness(&self) -> Result<()> {
        self.send_when_ready(Command::StepBrightness(-i16::from(
            BrightnessLevel::STEP_PERCENT,
        )))
    }

    pub fn power_on(&self) -> Result<()> {
        self.write(protocol::encode_power_on(), Mirror::None)
    }

    pub fn power_off(&self) -> Result<()> {
        self.write(protocol::encode_power_off(), Mirror::None)
    }

    pub fn set_power(&self, on: bool) -> Result<()> {
        if on {
            self.power_on()
        } else {
            self.power_off()
        }
    }

    // ---- Favorites ----

    fn with_favorites<R>(&self, f: impl FnOnce(&mut FavoritesStore) -> R) -> Result<R> {
        let mut favorites = self
            .favorites
            .lock()
            .map_err(|_| LedError::PersistenceCorruption("favorites lock poisoned".into()))?;
        Ok(f(&mut favorites))
    }

    pub fn add_favorite(&self, color: RgbColor) -> Result<bool> {
        self.with_favorites(|f| f.add(color))
    }

    pub fn remove_favorite(&self, color: RgbColor) -> Result<bool> {
        self.with_favorites(|f| f.remove(color))
    }

    pub fn list_favorites(&self) -> Result<Vec<RgbColor>> {
        self.with_favorites(|f| f.list())
    }

    pub fn can_add_more_favorites(&self) -> Result<bool> {
        self.with_favorites(|f| f.can_add_more())
    }

    pub fn is_favorite(&self, color: RgbColor) -> Result<bool> {
        self.with_favorites(|f| f.is_favorite(color))
    }

    pub fn clear_favorites(&self) -> Result<()> {
        self.with_favorites(|f| f.clear())
    }

    // ---- Observable state ----

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every published change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.borrow().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.snapshot.borrow().is_connecting()
    }

    pub fn connection_status_text(&self) -> String {
        self.snapshot.borrow().connection_status_text().to_string()
    }

    pub fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.snapshot.borrow().discovered_devices.clone()
    }

    pub fn current_brightness_percent(&self) -> u8 {
        self.snapshot.borrow().current_brightness_percent
    }

    /// Stop the manager, dropping any link, and wait for it to finish
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            warn!("Connection manager ended abnormally: {}", e);
        }
    }
}
