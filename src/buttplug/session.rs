// src/buttplug/session.rs

//! The client side of one Buttplug connection.
//!
//! A [`Session`] does no IO and owns no timers. The host feeds it transport
//! events as they arrive and calls [`Session::advance`] on a regular cadence;
//! the session answers by sending frames through its [`Transport`] and by
//! emitting [`ClientEvent`]s to its [`EventSink`].

use std::collections::BTreeMap;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use log::{debug, error, info, trace, warn};
use serde::Serialize;

use super::device::{Device, DeviceMut};
use super::error::SessionError;
use super::events::{ClientEvent, EventSink};
use super::feature::FeatureType;
use super::message::{
    self, DeviceAdded, DeviceList, DeviceMessageInfo, DeviceRemoved, ErrorReply, Message,
    MessageHandler, MessageKind, OkReply, Ping, RequestDeviceList, RequestServerInfo,
    ScanningFinished, SensorReading, ServerInfo, StartScanning, StopAllDevices, StopScanning,
    SPEC_VERSION,
};
use super::transport::{Transport, TransportEvent, CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    /// Waiting for the transport to open.
    Connecting,
    /// Transport open, handshake sent.
    AwaitingServerInfo,
    Connected,
}

pub struct Session<T, E> {
    transport: T,
    events: E,
    state: ConnectionState,
    next_id: u32,
    outbound: Vec<Message>,
    devices: BTreeMap<u32, Device>,
    client_name: String,
    server_name: String,
    server_address: String,
    /// Seconds between pings, if the server asked for them.
    ping_interval: Option<f64>,
    time_since_ping: f64,
    pending_connect: Option<oneshot::Sender<Result<(), SessionError>>>,
}

impl<T: Transport, E: EventSink> Session<T, E> {
    pub fn new(transport: T, events: E) -> Self {
        Self {
            transport,
            events,
            state: ConnectionState::Disconnected,
            next_id: 1,
            outbound: Vec::new(),
            devices: BTreeMap::new(),
            client_name: String::new(),
            server_name: String::new(),
            server_address: String::new(),
            ping_interval: None,
            time_since_ping: 0.0,
            pending_connect: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    /// Devices the server currently reports as present.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|device| device.is_connected())
    }

    /// Every device seen during this session's lifetime, including removed ones.
    pub fn all_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device(&self, index: u32) -> Option<&Device> {
        self.devices.get(&index)
    }

    pub fn device_mut(&mut self, index: u32) -> Option<DeviceMut<'_>> {
        let device = self.devices.get_mut(&index)?;
        Some(DeviceMut {
            device,
            events: &mut self.events,
        })
    }

    /// Starts connecting to a server. The returned handle resolves once the
    /// handshake completes or the attempt fails.
    pub fn connect(
        &mut self,
        client_name: &str,
        address: &str,
    ) -> Result<ConnectHandle, SessionError> {
        match self.state {
            ConnectionState::Connected => return Err(SessionError::AlreadyConnected),
            ConnectionState::Connecting | ConnectionState::AwaitingServerInfo => {
                return Err(SessionError::AlreadyConnecting)
            }
            ConnectionState::Disconnected => {}
        }

        info!("Connecting to Buttplug server at {} as {}", address, client_name);
        self.state = ConnectionState::Connecting;
        if let Err(e) = self.transport.open(address) {
            error!("Failed to open connection to {}: {}", address, e);
            self.state = ConnectionState::Disconnected;
            return Err(e.into());
        }
        self.client_name = client_name.to_string();
        self.server_address = address.to_string();

        let (sender, receiver) = oneshot::channel();
        self.pending_connect = Some(sender);
        Ok(ConnectHandle { receiver })
    }

    /// Closes the connection. The session can connect again afterwards and
    /// keeps its device table.
    pub fn stop_client(&mut self, reason: &str) -> Result<(), SessionError> {
        if self.state == ConnectionState::Disconnected {
            return Err(SessionError::NotConnected);
        }
        self.reset(reason.to_string(), Some(CLOSE_GOING_AWAY));
        Ok(())
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_transport_opened(),
            TransportEvent::Message(text) => self.on_frame(&text),
            TransportEvent::Error(message) => {
                if self.state != ConnectionState::Disconnected {
                    error!("Transport error: {}", message);
                    self.reset(message, None);
                }
            }
            TransportEvent::Closed { code, reason, was_clean } => {
                if self.state == ConnectionState::Disconnected {
                    return;
                }
                info!("Connection closed with code {} (clean: {}): {}", code, was_clean, reason);
                let reason = if reason.is_empty() {
                    format!("connection closed with code {}", code)
                } else {
                    reason
                };
                self.reset(reason, None);
            }
        }
    }

    /// Queues a message for the next send, assigning it the next message id.
    pub fn enqueue_message(&mut self, message: impl Into<Message>) -> Result<(), SessionError> {
        let message = message.into();
        if self.state != ConnectionState::Connected {
            error!("Cannot send {} while not connected", message.kind());
            return Err(SessionError::NotConnected);
        }
        self.push_outbound(message);
        Ok(())
    }

    pub fn start_scanning(&mut self) -> Result<(), SessionError> {
        self.enqueue_message(StartScanning { id: 0 })
    }

    pub fn stop_scanning(&mut self) -> Result<(), SessionError> {
        self.enqueue_message(StopScanning { id: 0 })
    }

    pub fn stop_all_devices(&mut self) -> Result<(), SessionError> {
        self.enqueue_message(StopAllDevices { id: 0 })
    }

    /// Runs one host tick: flushes every device's queued commands, keeps the
    /// connection alive, and sends everything accumulated as a single frame.
    pub fn advance(&mut self, delta_time: f64) -> Result<(), SessionError> {
        if self.state != ConnectionState::Connected {
            return Ok(());
        }

        let mut flushed = Vec::new();
        for device in self.devices.values_mut() {
            device.tick_auto_stops(delta_time);
            flushed.extend(device.flush_message_queue(delta_time));
        }
        for message in flushed {
            self.push_outbound(message);
        }

        if let Some(interval) = self.ping_interval {
            self.time_since_ping += delta_time;
            if self.time_since_ping >= interval {
                self.time_since_ping = 0.0;
                self.push_outbound(Ping { id: 0 }.into());
            }
        }

        self.send_outbound()
    }

    fn push_outbound(&mut self, mut message: Message) {
        message.set_id(self.next_id);
        self.next_id += 1;
        self.outbound.push(message);
    }

    fn send_outbound(&mut self) -> Result<(), SessionError> {
        if self.outbound.is_empty() {
            return Ok(());
        }
        let batch = mem::take(&mut self.outbound);
        if let (Some(first), Some(last)) = (batch.first(), batch.last()) {
            debug!("Sending {} message(s), ids {}..={}", batch.len(), first.id(), last.id());
        }
        let text = message::encode(&batch).map_err(SessionError::Encode)?;
        trace!("Sending {}", text);
        if let Err(e) = self.transport.send(text) {
            error!("Failed to send to server: {}", e);
            self.reset(e.to_string(), None);
            return Err(e.into());
        }
        Ok(())
    }

    fn on_transport_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            warn!("Ignoring transport open in state {:?}", self.state);
            return;
        }
        debug!("Transport open, requesting server info");
        self.state = ConnectionState::AwaitingServerInfo;
        self.push_outbound(
            RequestServerInfo {
                id: 0,
                client_name: self.client_name.clone(),
                message_version: SPEC_VERSION,
            }
            .into(),
        );
        if let Err(e) = self.send_outbound() {
            warn!("Handshake not sent: {}", e);
        }
    }

    fn on_frame(&mut self, text: &str) {
        if !matches!(
            self.state,
            ConnectionState::AwaitingServerInfo | ConnectionState::Connected
        ) {
            warn!("Ignoring frame received in state {:?}", self.state);
            return;
        }
        trace!("Received {}", text);
        let messages = match message::decode(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Discarding malformed frame: {}", e);
                return;
            }
        };
        for message in messages {
            if self.state == ConnectionState::Disconnected {
                break;
            }
            message.dispatch(self);
        }
    }

    /// Returns to `Disconnected`, optionally closing the transport first.
    fn reset(&mut self, reason: String, close_code: Option<u16>) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        if let Some(code) = close_code {
            self.transport.close(code, &reason);
        }

        self.state = ConnectionState::Disconnected;
        for device in self.devices.values_mut() {
            device.set_connected(false);
        }
        self.outbound.clear();
        self.ping_interval = None;
        self.time_since_ping = 0.0;
        self.next_id = 1;
        self.client_name.clear();
        self.server_name.clear();
        self.server_address.clear();

        if let Some(pending) = self.pending_connect.take() {
            let _ = pending.send(Err(SessionError::ConnectionFailed(reason.clone())));
        }
        info!("Disconnected: {}", reason);
        self.events.emit(ClientEvent::Disconnected { reason });
    }

    fn add_device(&mut self, info: DeviceMessageInfo) {
        let index = info.device_index;
        let reconnected = self
            .devices
            .get(&index)
            .is_some_and(|device| device.has_identity_of(&info));

        if reconnected {
            debug!("Device {} ({}) reconnected", index, info.device_name);
        } else {
            if let Some(previous) = self.devices.get(&index) {
                info!(
                    "Device index {} reassigned from {} to {}",
                    index,
                    previous.descriptive_name(),
                    info.device_name
                );
            }
            self.devices.insert(index, Device::from_server_info(&info));
        }

        if let Some(device) = self.devices.get_mut(&index) {
            device.set_connected(true);
            info!("Device added: {} ({})", device.display_name(), index);
            self.events.emit(ClientEvent::DeviceAdded(device.info()));
        }
    }
}

impl<T: Transport, E: EventSink> MessageHandler for Session<T, E> {
    type Output = ();

    fn unhandled(&mut self, kind: MessageKind, id: u32) {
        if kind.is_client_only() {
            error!("Server sent client-only message {} (id {})", kind, id);
            self.reset(
                format!("protocol violation: server sent {}", kind),
                Some(CLOSE_POLICY_VIOLATION),
            );
        } else {
            warn!("Unhandled {} message (id {})", kind, id);
        }
    }

    fn on_ok(&mut self, message: OkReply) {
        trace!("Ok (id {})", message.id);
    }

    fn on_error(&mut self, message: ErrorReply) {
        warn!(
            "Server error {:?} (id {}): {}",
            message.error_code, message.id, message.error_message
        );
    }

    fn on_ping(&mut self, message: Ping) {
        trace!("Ping from server (id {})", message.id);
    }

    fn on_server_info(&mut self, message: ServerInfo) {
        if self.state != ConnectionState::AwaitingServerInfo {
            warn!("Ignoring unexpected ServerInfo in state {:?}", self.state);
            return;
        }
        if message.message_version != SPEC_VERSION {
            error!(
                "Server {} speaks message version {}, expected {}",
                message.server_name, message.message_version, SPEC_VERSION
            );
            self.reset(
                format!(
                    "server message version {} does not match client version {}",
                    message.message_version, SPEC_VERSION
                ),
                Some(CLOSE_POLICY_VIOLATION),
            );
            return;
        }

        self.state = ConnectionState::Connected;
        self.server_name = message.server_name;
        self.ping_interval =
            (message.max_ping_time > 0).then(|| f64::from(message.max_ping_time) / 2000.0);
        self.time_since_ping = 0.0;

        self.push_outbound(RequestDeviceList { id: 0 }.into());
        if let Err(e) = self.send_outbound() {
            warn!("Device list request not sent: {}", e);
            return;
        }

        info!("Connected to {}", self.server_name);
        self.events.emit(ClientEvent::Connected);
        if let Some(pending) = self.pending_connect.take() {
            let _ = pending.send(Ok(()));
        }
    }

    fn on_scanning_finished(&mut self, _message: ScanningFinished) {
        debug!("Scanning finished");
        self.events.emit(ClientEvent::ScanningFinished);
    }

    fn on_device_list(&mut self, message: DeviceList) {
        for device in message.devices {
            self.add_device(device);
        }
    }

    fn on_device_added(&mut self, message: DeviceAdded) {
        self.add_device(message.device);
    }

    fn on_device_removed(&mut self, message: DeviceRemoved) {
        let Some(device) = self.devices.get_mut(&message.device_index) else {
            warn!("Server removed unknown device {}", message.device_index);
            return;
        };
        device.set_connected(false);
        info!("Device removed: {} ({})", device.display_name(), message.device_index);
        self.events.emit(ClientEvent::DeviceRemoved(device.info()));
    }

    fn on_sensor_reading(&mut self, message: SensorReading) {
        let Some(device) = self.devices.get_mut(&message.device_index) else {
            warn!("Sensor reading for unknown device {}", message.device_index);
            return;
        };
        let feature_type = FeatureType::from_protocol_name(&message.sensor_type);
        let matching: Vec<usize> = device
            .features()
            .iter()
            .enumerate()
            .filter(|(_, feature)| feature.matches_sensor(feature_type, message.sensor_index))
            .map(|(feature_index, _)| feature_index)
            .collect();

        match matching.len() {
            0 => {
                warn!(
                    "No {} sensor {} on device {}",
                    message.sensor_type, message.sensor_index, message.device_index
                );
                return;
            }
            1 => {}
            n => warn!(
                "{} features of device {} match {} sensor {}, delivering to all",
                n, message.device_index, message.sensor_type, message.sensor_index
            ),
        }

        for feature_index in matching {
            if let Some(mut feature) = device.feature_mut(feature_index, &mut self.events) {
                feature.set_sensor_reading(message.data.clone());
            }
        }
    }
}

/// A connection attempt in flight. Dropping it stops waiting but does not
/// cancel the connection.
#[derive(Debug)]
pub struct ConnectHandle {
    receiver: oneshot::Receiver<Result<(), SessionError>>,
}

impl ConnectHandle {
    /// Non-blocking check; `None` while the handshake is still running.
    pub fn try_result(&mut self) -> Option<Result<(), SessionError>> {
        match self.receiver.try_recv() {
            Ok(result) => result,
            Err(oneshot::Canceled) => Some(Err(session_dropped())),
        }
    }
}

impl Future for ConnectHandle {
    type Output = Result<(), SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(session_dropped())))
    }
}

fn session_dropped() -> SessionError {
    SessionError::ConnectionFailed("session dropped".to_string())
}
