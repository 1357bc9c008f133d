// src/buttplug/device_manager.rs

//! Process-wide owner of the Buttplug session.
//!
//! [`initialize_device`] spawns a driver task that owns the [`Session`] and
//! its [`IntifaceSocket`]. The driver ticks the session on a fixed interval,
//! feeds it transport events, scans for devices after every connect, and
//! reconnects after a delay when the server goes away. The rest of the
//! application talks to it through [`oscillate`], [`send_command`] and
//! [`status`].

use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF64;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::buttplug::device::{Device, UNKNOWN_BATTERY_LEVEL};
use crate::buttplug::events::ClientEvent;
use crate::buttplug::feature::FeatureType;
use crate::buttplug::session::{ConnectHandle, ConnectionState, Session};
use crate::buttplug::transport::{Transport, TransportEvent};
use crate::config::Config;
use crate::intiface_socket::IntifaceSocket;

static DEVICE_MANAGER: OnceCell<DeviceManager> = OnceCell::new();

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceManagerError {
    #[error("device manager has not been initialized")]
    NotInitialized,
    #[error("device manager has stopped")]
    Stopped,
}

/// Requests from the control surface, applied on the driver's next turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// Drives every actuator of a type on every connected device.
    Actuate {
        feature_type: FeatureType,
        value: f64,
        /// Seconds; zero or less runs until changed.
        duration: f64,
    },
    StopAll,
    StartScanning,
    StopScanning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureStatus {
    pub index: usize,
    pub descriptor: String,
    pub feature_type: FeatureType,
    pub actuator: bool,
    pub last_reading: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub index: u32,
    pub name: String,
    pub display_name: String,
    pub connected: bool,
    pub battery_level: Option<f64>,
    pub features: Vec<FeatureStatus>,
}

impl From<&Device> for DeviceStatus {
    fn from(device: &Device) -> Self {
        let battery_level = device.battery_level();
        Self {
            index: device.index(),
            name: device.descriptive_name().to_string(),
            display_name: device.display_name().to_string(),
            connected: device.is_connected(),
            battery_level: (battery_level != UNKNOWN_BATTERY_LEVEL).then_some(battery_level),
            features: device
                .features()
                .iter()
                .enumerate()
                .map(|(index, feature)| FeatureStatus {
                    index,
                    descriptor: feature.descriptor().to_string(),
                    feature_type: feature.feature_type(),
                    actuator: feature.is_actuator(),
                    last_reading: feature.last_sensor_reading().to_vec(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStatus {
    pub state: ConnectionState,
    pub server_name: String,
    pub devices: Vec<DeviceStatus>,
}

impl Default for ManagerStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            server_name: String::new(),
            devices: Vec::new(),
        }
    }
}

pub struct DeviceManager {
    commands: UnboundedSender<ControlCommand>,
    latest_value: Arc<AtomicF64>,
    status: watch::Receiver<ManagerStatus>,
}

impl DeviceManager {
    fn new(config: Config) -> Self {
        let latest_value = Arc::new(AtomicF64::new(0.0));
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let (status_sender, status) = watch::channel(ManagerStatus::default());
        let (transport, transport_events) = IntifaceSocket::new();

        let tick_interval = config.tick_interval;
        let driver = Driver::new(transport, config, latest_value.clone());
        tokio::spawn(async move {
            let mut transport_events = UnboundedReceiverStream::new(transport_events);
            let mut commands = UnboundedReceiverStream::new(command_receiver);
            let mut driver = driver;
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_tick = Instant::now();

            driver.connect();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Instant::now();
                        driver.tick(now.duration_since(last_tick).as_secs_f64());
                        last_tick = now;
                    }
                    Some(event) = transport_events.next() => driver.handle_transport_event(event),
                    Some(command) = commands.next() => driver.apply(command),
                    else => break,
                }
                let snapshot = driver.status();
                status_sender.send_if_modified(|current| {
                    if *current == snapshot {
                        return false;
                    }
                    *current = snapshot;
                    true
                });
            }
            info!("Device manager stopped");
        });

        Self {
            commands,
            latest_value,
            status,
        }
    }

    pub fn set_value(&self, value: f64) {
        self.latest_value.store(value, Ordering::Relaxed);
    }

    pub fn send_command(&self, command: ControlCommand) -> Result<(), DeviceManagerError> {
        self.commands
            .send(command)
            .map_err(|_| DeviceManagerError::Stopped)
    }

    pub fn status(&self) -> ManagerStatus {
        self.status.borrow().clone()
    }
}

/// Starts the device manager. Must be called from within a tokio runtime;
/// later calls are ignored.
pub fn initialize_device(config: Config) {
    if DEVICE_MANAGER.get().is_some() {
        warn!("Device manager already initialized");
        return;
    }
    if DEVICE_MANAGER.set(DeviceManager::new(config)).is_err() {
        warn!("Device manager already initialized");
    }
}

/// Sets the oscillation level every connected device is driven at.
pub fn oscillate(value: f64) -> Result<(), DeviceManagerError> {
    let manager = DEVICE_MANAGER.get().ok_or(DeviceManagerError::NotInitialized)?;
    manager.set_value(value);
    Ok(())
}

pub fn send_command(command: ControlCommand) -> Result<(), DeviceManagerError> {
    DEVICE_MANAGER
        .get()
        .ok_or(DeviceManagerError::NotInitialized)?
        .send_command(command)
}

pub fn status() -> Result<ManagerStatus, DeviceManagerError> {
    Ok(DEVICE_MANAGER
        .get()
        .ok_or(DeviceManagerError::NotInitialized)?
        .status())
}

/// Owns the session and everything that happens around it between ticks.
struct Driver<T> {
    session: Session<T, UnboundedSender<ClientEvent>>,
    client_events: UnboundedReceiver<ClientEvent>,
    config: Config,
    client_name: String,
    latest_value: Arc<AtomicF64>,
    applied_value: Option<f64>,
    connect_handle: Option<ConnectHandle>,
    /// Seconds until the post-connect scan is stopped.
    scan_remaining: Option<f64>,
    /// Seconds until the next connect attempt.
    reconnect_in: Option<f64>,
}

impl<T: Transport> Driver<T> {
    fn new(transport: T, config: Config, latest_value: Arc<AtomicF64>) -> Self {
        let (events, client_events) = mpsc::unbounded_channel();
        let client_name = config.resolved_client_name();
        Self {
            session: Session::new(transport, events),
            client_events,
            config,
            client_name,
            latest_value,
            applied_value: None,
            connect_handle: None,
            scan_remaining: None,
            reconnect_in: None,
        }
    }

    fn connect(&mut self) {
        match self
            .session
            .connect(&self.client_name, &self.config.server_address)
        {
            Ok(handle) => self.connect_handle = Some(handle),
            Err(e) => {
                warn!("Could not connect to {}: {}", self.config.server_address, e);
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if let Some(delay) = self.config.reconnect_delay {
            info!("Reconnecting in {}s", delay.as_secs_f64());
            self.reconnect_in = Some(delay.as_secs_f64());
        }
    }

    fn tick(&mut self, delta_time: f64) {
        if let Some(result) = self.connect_handle.as_mut().and_then(ConnectHandle::try_result) {
            self.connect_handle = None;
            match result {
                Ok(()) => debug!("Connect attempt succeeded"),
                Err(e) => warn!("Connect attempt failed: {}", e),
            }
        }

        if let Some(remaining) = self.scan_remaining.as_mut() {
            *remaining -= delta_time;
            if *remaining <= 0.0 {
                self.scan_remaining = None;
                if let Err(e) = self.session.stop_scanning() {
                    debug!("Not stopping scan: {}", e);
                }
            }
        }

        if let Some(remaining) = self.reconnect_in.as_mut() {
            *remaining -= delta_time;
            if *remaining <= 0.0 {
                self.reconnect_in = None;
                self.connect();
            }
        }

        self.apply_latest_value();
        if let Err(e) = self.session.advance(delta_time) {
            warn!("Tick failed: {}", e);
        }
        self.drain_client_events();
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        self.session.handle_transport_event(event);
        self.drain_client_events();
    }

    fn apply_latest_value(&mut self) {
        if !self.session.is_connected() {
            return;
        }
        let value = self.latest_value.load(Ordering::Relaxed);
        if self.applied_value == Some(value) {
            return;
        }
        self.applied_value = Some(value);
        self.actuate_all(FeatureType::Oscillate, value, 0.0);
    }

    fn actuate_all(&mut self, feature_type: FeatureType, value: f64, duration: f64) {
        let indices: Vec<u32> = self.session.devices().map(Device::index).collect();
        for index in indices {
            if let Some(mut device) = self.session.device_mut(index) {
                device.actuate_all(feature_type, value, duration);
            }
        }
    }

    fn apply(&mut self, command: ControlCommand) {
        debug!("Applying {:?}", command);
        let result = match command {
            ControlCommand::Actuate { feature_type, value, duration } => {
                self.actuate_all(feature_type, value, duration);
                Ok(())
            }
            ControlCommand::StopAll => {
                self.latest_value.store(0.0, Ordering::Relaxed);
                self.applied_value = Some(0.0);
                self.session.stop_all_devices()
            }
            ControlCommand::StartScanning => {
                self.scan_remaining = Some(self.config.scan_duration.as_secs_f64());
                self.session.start_scanning()
            }
            ControlCommand::StopScanning => {
                self.scan_remaining = None;
                self.session.stop_scanning()
            }
        };
        if let Err(e) = result {
            warn!("Control command failed: {}", e);
        }
    }

    fn drain_client_events(&mut self) {
        while let Ok(event) = self.client_events.try_recv() {
            match event {
                ClientEvent::Connected => {
                    info!("Connected to {}, scanning for devices", self.session.server_name());
                    self.reconnect_in = None;
                    self.applied_value = None;
                    match self.session.start_scanning() {
                        Ok(()) => {
                            self.scan_remaining = Some(self.config.scan_duration.as_secs_f64())
                        }
                        Err(e) => warn!("Could not start scanning: {}", e),
                    }
                }
                ClientEvent::Disconnected { reason } => {
                    warn!("Disconnected from server: {}", reason);
                    self.scan_remaining = None;
                    self.schedule_reconnect();
                }
                ClientEvent::ScanningFinished => info!("Device scanning is finished"),
                ClientEvent::DeviceAdded(device) => {
                    info!("Device {} connected", device.name);
                    self.applied_value = None;
                }
                ClientEvent::DeviceRemoved(device) => info!("Device {} removed", device.name),
                ClientEvent::SensorReading { device_index, feature_type, data, .. } => {
                    debug!("{:?} reading from device {}: {:?}", feature_type, device_index, data)
                }
            }
        }
    }

    fn status(&self) -> ManagerStatus {
        ManagerStatus {
            state: self.session.state(),
            server_name: self.session.server_name().to_string(),
            devices: self.session.all_devices().map(DeviceStatus::from).collect(),
        }
    }
}
