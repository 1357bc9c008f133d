// src/buttplug/events.rs

//! Notifications emitted by a [`Session`](super::session::Session) to its host.

use log::trace;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::feature::FeatureType;

/// Identity of a device at the moment an event was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Handshake completed and the device list was requested.
    Connected,
    /// The session was reset; fired once per reset, never per device.
    Disconnected { reason: String },
    ScanningFinished,
    DeviceAdded(DeviceInfo),
    DeviceRemoved(DeviceInfo),
    SensorReading {
        device_index: u32,
        feature_index: usize,
        feature_type: FeatureType,
        data: Vec<i32>,
    },
}

/// Receives events synchronously, at the point they occur.
pub trait EventSink {
    fn emit(&mut self, event: ClientEvent);
}

impl EventSink for Vec<ClientEvent> {
    fn emit(&mut self, event: ClientEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<ClientEvent> {
    fn emit(&mut self, event: ClientEvent) {
        if let Err(e) = self.send(event) {
            trace!("Dropping event, receiver is gone: {:?}", e.0);
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: ClientEvent) {
        (**self).emit(event);
    }
}
