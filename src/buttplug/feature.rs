// src/buttplug/feature.rs

//! A single actuator or sensor of a device.
//!
//! Features are created from the attribute lists a server sends with each
//! device. The position of an attribute record within its command list is
//! the feature's command-slot index, and that index is what addresses the
//! feature in outbound commands.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use log::debug;
use serde::Serialize;

use super::error::SessionError;
use super::events::{ClientEvent, EventSink};
use super::message::{
    Message, MessageAttributes, SensorRange, SensorReadCmd, SensorSubscribeCmd,
    SensorUnsubscribeCmd,
};

/// What a feature does, parsed from the server's actuator or sensor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum FeatureType {
    #[default]
    Unknown,
    /// Vibration magnitude.
    Vibrate,
    /// Rotation speed.
    Rotate,
    /// Oscillation speed.
    Oscillate,
    /// Constriction pressure.
    Constrict,
    /// Inflation pressure.
    Inflate,
    /// Linear movement.
    Position,
    /// Battery level.
    Battery,
    /// Received signal strength.
    #[serde(rename = "RSSI")]
    Rssi,
    Button,
    /// Linear pressure.
    Pressure,
}

impl FeatureType {
    pub const ACTUATORS: [FeatureType; 6] = [
        FeatureType::Vibrate,
        FeatureType::Rotate,
        FeatureType::Oscillate,
        FeatureType::Constrict,
        FeatureType::Inflate,
        FeatureType::Position,
    ];

    /// Parses a protocol type string. Anything unrecognised is `Unknown`.
    pub fn from_protocol_name(name: &str) -> Self {
        match name {
            "Vibrate" => FeatureType::Vibrate,
            "Rotate" => FeatureType::Rotate,
            "Oscillate" => FeatureType::Oscillate,
            "Constrict" => FeatureType::Constrict,
            "Inflate" => FeatureType::Inflate,
            "Position" => FeatureType::Position,
            "Battery" => FeatureType::Battery,
            "RSSI" => FeatureType::Rssi,
            "Button" => FeatureType::Button,
            "Pressure" => FeatureType::Pressure,
            _ => FeatureType::Unknown,
        }
    }

    /// The protocol type string, as used for `ActuatorType` and `SensorType`.
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureType::Unknown => "Unknown",
            FeatureType::Vibrate => "Vibrate",
            FeatureType::Rotate => "Rotate",
            FeatureType::Oscillate => "Oscillate",
            FeatureType::Constrict => "Constrict",
            FeatureType::Inflate => "Inflate",
            FeatureType::Position => "Position",
            FeatureType::Battery => "Battery",
            FeatureType::Rssi => "RSSI",
            FeatureType::Button => "Button",
            FeatureType::Pressure => "Pressure",
        }
    }
}

/// The command list a feature came from, with its index in that list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSlot {
    Scalar(u32),
    Linear(u32),
    Rotate(u32),
    SensorRead(u32),
    SensorSubscribe(u32),
}

/// A pending actuation, flushed by the owning device on its next send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Actuation {
    pub value: f64,
    /// Seconds.
    pub duration: f64,
}

#[derive(Debug)]
pub struct Feature {
    descriptor: String,
    feature_type: FeatureType,
    slot: CommandSlot,
    step_count: u32,
    sensor_range: Vec<SensorRange>,
    queued_actuation: Option<Actuation>,
    auto_stop_in: Option<f64>,
    last_sensor_reading: Vec<i32>,
    pending_reads: Vec<oneshot::Sender<Vec<i32>>>,
}

impl Feature {
    pub fn from_attributes(slot: CommandSlot, attributes: &MessageAttributes) -> Self {
        let mut feature = Self {
            descriptor: attributes.feature_descriptor.clone(),
            feature_type: FeatureType::Unknown,
            slot,
            step_count: 0,
            sensor_range: Vec::new(),
            queued_actuation: None,
            auto_stop_in: None,
            last_sensor_reading: Vec::new(),
            pending_reads: Vec::new(),
        };
        if feature.is_actuator() {
            feature.feature_type = FeatureType::from_protocol_name(&attributes.actuator_type);
            feature.step_count = attributes.step_count;
        } else {
            feature.feature_type = FeatureType::from_protocol_name(&attributes.sensor_type);
            feature.sensor_range = attributes.sensor_range.clone();
        }
        feature
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn feature_type(&self) -> FeatureType {
        self.feature_type
    }

    pub fn command_slot(&self) -> CommandSlot {
        self.slot
    }

    /// Number of discrete steps an actuator supports.
    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    /// Range of each reading dimension of a sensor.
    pub fn sensor_range(&self) -> &[SensorRange] {
        &self.sensor_range
    }

    pub fn scalar_cmd_index(&self) -> Option<u32> {
        match self.slot {
            CommandSlot::Scalar(index) => Some(index),
            _ => None,
        }
    }

    pub fn linear_cmd_index(&self) -> Option<u32> {
        match self.slot {
            CommandSlot::Linear(index) => Some(index),
            _ => None,
        }
    }

    pub fn rotate_cmd_index(&self) -> Option<u32> {
        match self.slot {
            CommandSlot::Rotate(index) => Some(index),
            _ => None,
        }
    }

    pub fn sensor_read_cmd_index(&self) -> Option<u32> {
        match self.slot {
            CommandSlot::SensorRead(index) => Some(index),
            _ => None,
        }
    }

    pub fn sensor_subscribe_cmd_index(&self) -> Option<u32> {
        match self.slot {
            CommandSlot::SensorSubscribe(index) => Some(index),
            _ => None,
        }
    }

    pub fn is_actuator(&self) -> bool {
        self.scalar_cmd_index().is_some()
            || self.rotate_cmd_index().is_some()
            || self.linear_cmd_index().is_some()
    }

    pub fn is_sensor(&self) -> bool {
        self.can_read() || self.can_subscribe()
    }

    /// Can this sensor be polled?
    pub fn can_read(&self) -> bool {
        self.sensor_read_cmd_index().is_some()
    }

    /// Can this sensor push readings?
    pub fn can_subscribe(&self) -> bool {
        self.sensor_subscribe_cmd_index().is_some()
    }

    /// Does a reading with this type and sensor index belong to this feature?
    pub fn matches_sensor(&self, feature_type: FeatureType, sensor_index: u32) -> bool {
        self.feature_type == feature_type
            && (self.sensor_read_cmd_index() == Some(sensor_index)
                || self.sensor_subscribe_cmd_index() == Some(sensor_index))
    }

    pub fn queued_actuation(&self) -> Option<Actuation> {
        self.queued_actuation
    }

    pub fn last_sensor_reading(&self) -> &[i32] {
        &self.last_sensor_reading
    }

    /// Queues an actuation for the next send. A positive `duration` (seconds)
    /// schedules an automatic stop; zero or less runs until told otherwise.
    pub fn actuate(&mut self, value: f64, duration: f64) {
        if !self.is_actuator() {
            return;
        }
        self.queued_actuation = Some(Actuation { value, duration });
        self.auto_stop_in = (duration > 0.0).then_some(duration);
    }

    pub fn stop(&mut self) {
        self.actuate(0.0, 0.0);
    }

    /// Counts down a pending automatic stop.
    pub(crate) fn tick_auto_stop(&mut self, delta_time: f64) {
        if let Some(remaining) = self.auto_stop_in.as_mut() {
            *remaining -= delta_time;
            if *remaining <= 0.0 {
                debug!("Auto-stopping {} feature", self.feature_type.as_str());
                self.stop();
            }
        }
    }

    pub(crate) fn take_queued_actuation(&mut self) -> Option<Actuation> {
        self.queued_actuation.take()
    }

    /// Drops the queued actuation and any pending automatic stop.
    pub(crate) fn clear_queued_actuation(&mut self) {
        self.queued_actuation = None;
        self.auto_stop_in = None;
    }

    /// Stores a reading and resolves every outstanding async read with it.
    pub(crate) fn set_sensor_reading(&mut self, data: Vec<i32>) {
        for pending in self.pending_reads.drain(..) {
            // A dropped handle just means the caller stopped waiting.
            let _ = pending.send(data.clone());
        }
        self.last_sensor_reading = data;
    }

    fn read_command(&self, device_index: u32) -> Option<Message> {
        let sensor_index = self.sensor_read_cmd_index()?;
        Some(
            SensorReadCmd {
                id: 0,
                device_index,
                sensor_index,
                sensor_type: self.feature_type.as_str().to_string(),
            }
            .into(),
        )
    }

    fn subscribe_command(&self, device_index: u32) -> Option<Message> {
        let sensor_index = self.sensor_subscribe_cmd_index()?;
        Some(
            SensorSubscribeCmd {
                id: 0,
                device_index,
                sensor_index,
                sensor_type: self.feature_type.as_str().to_string(),
            }
            .into(),
        )
    }

    fn unsubscribe_command(&self, device_index: u32) -> Option<Message> {
        let sensor_index = self.sensor_subscribe_cmd_index()?;
        Some(
            SensorUnsubscribeCmd {
                id: 0,
                device_index,
                sensor_index,
                sensor_type: self.feature_type.as_str().to_string(),
            }
            .into(),
        )
    }
}

/// Mutable access to a feature together with its device's outbound queue and
/// the session's event sink, for the operations that need them.
pub struct FeatureMut<'a> {
    pub(crate) feature: &'a mut Feature,
    pub(crate) device_index: u32,
    pub(crate) feature_index: usize,
    pub(crate) queue: &'a mut Vec<Message>,
    pub(crate) events: &'a mut dyn EventSink,
}

impl FeatureMut<'_> {
    pub fn feature_index(&self) -> usize {
        self.feature_index
    }

    pub fn subscribe(&mut self) {
        if let Some(command) = self.feature.subscribe_command(self.device_index) {
            self.queue.push(command);
        }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(command) = self.feature.unsubscribe_command(self.device_index) {
            self.queue.push(command);
        }
    }

    /// Polls the sensor. A sensor that cannot be polled answers at once with
    /// an empty reading.
    pub fn read(&mut self) {
        match self.feature.read_command(self.device_index) {
            Some(command) => self.queue.push(command),
            None => self.set_sensor_reading(Vec::new()),
        }
    }

    /// Returns a handle that resolves with the next reading. Concurrent
    /// callers share a single outstanding read.
    pub fn async_read(&mut self) -> SensorReadHandle {
        self.feature.pending_reads.retain(|pending| !pending.is_canceled());
        let first = self.feature.pending_reads.is_empty();
        let (sender, receiver) = oneshot::channel();
        self.feature.pending_reads.push(sender);
        if first {
            self.read();
        }
        SensorReadHandle { receiver }
    }

    pub(crate) fn set_sensor_reading(&mut self, data: Vec<i32>) {
        self.feature.set_sensor_reading(data.clone());
        self.events.emit(ClientEvent::SensorReading {
            device_index: self.device_index,
            feature_index: self.feature_index,
            feature_type: self.feature.feature_type,
            data,
        });
    }
}

impl Deref for FeatureMut<'_> {
    type Target = Feature;

    fn deref(&self) -> &Feature {
        &*self.feature
    }
}

impl DerefMut for FeatureMut<'_> {
    fn deref_mut(&mut self) -> &mut Feature {
        &mut *self.feature
    }
}

/// A sensor read in flight. Dropping it abandons the wait without affecting
/// other readers.
#[derive(Debug)]
pub struct SensorReadHandle {
    receiver: oneshot::Receiver<Vec<i32>>,
}

impl SensorReadHandle {
    /// Non-blocking check; `None` while the reading is still pending.
    pub fn try_result(&mut self) -> Option<Result<Vec<i32>, SessionError>> {
        match self.receiver.try_recv() {
            Ok(Some(data)) => Some(Ok(data)),
            Ok(None) => None,
            Err(oneshot::Canceled) => Some(Err(SessionError::ReadCanceled)),
        }
    }
}

impl Future for SensorReadHandle {
    type Output = Result<Vec<i32>, SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.map_err(|_| SessionError::ReadCanceled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actuator(slot: CommandSlot, actuator_type: &str) -> Feature {
        Feature::from_attributes(
            slot,
            &MessageAttributes {
                feature_descriptor: "Motor".to_string(),
                step_count: 20,
                actuator_type: actuator_type.to_string(),
                ..Default::default()
            },
        )
    }

    fn sensor(slot: CommandSlot, sensor_type: &str) -> Feature {
        Feature::from_attributes(
            slot,
            &MessageAttributes {
                sensor_type: sensor_type.to_string(),
                sensor_range: vec![SensorRange { min: 0, max: 100 }],
                ..Default::default()
            },
        )
    }

    fn view<'a>(
        feature: &'a mut Feature,
        queue: &'a mut Vec<Message>,
        events: &'a mut Vec<ClientEvent>,
    ) -> FeatureMut<'a> {
        FeatureMut { feature, device_index: 3, feature_index: 0, queue, events }
    }

    #[test]
    fn feature_types_parse_from_protocol_names() {
        assert_eq!(FeatureType::from_protocol_name("RSSI"), FeatureType::Rssi);
        assert_eq!(FeatureType::from_protocol_name("Vibrate"), FeatureType::Vibrate);
        assert_eq!(FeatureType::from_protocol_name("vibrate"), FeatureType::Unknown);
        assert_eq!(FeatureType::from_protocol_name("Temperature"), FeatureType::Unknown);
        assert_eq!(FeatureType::Rssi.as_str(), "RSSI");
    }

    #[test]
    fn actuators_and_sensors_are_exclusive() {
        let motor = actuator(CommandSlot::Scalar(1), "Vibrate");
        assert!(motor.is_actuator());
        assert!(!motor.is_sensor());
        assert_eq!(motor.scalar_cmd_index(), Some(1));
        assert_eq!(motor.step_count(), 20);
        assert!(motor.sensor_range().is_empty());

        let battery = sensor(CommandSlot::SensorRead(0), "Battery");
        assert!(battery.is_sensor());
        assert!(!battery.is_actuator());
        assert!(battery.can_read());
        assert!(!battery.can_subscribe());
        assert_eq!(battery.feature_type(), FeatureType::Battery);
        assert_eq!(battery.step_count(), 0);
    }

    #[test]
    fn sensors_do_not_actuate() {
        let mut battery = sensor(CommandSlot::SensorRead(0), "Battery");
        battery.actuate(1.0, 0.0);
        assert_eq!(battery.queued_actuation(), None);
    }

    #[test]
    fn actuation_with_duration_stops_itself() {
        let mut motor = actuator(CommandSlot::Scalar(0), "Vibrate");
        motor.actuate(0.6, 2.0);
        assert_eq!(motor.take_queued_actuation(), Some(Actuation { value: 0.6, duration: 2.0 }));

        motor.tick_auto_stop(1.5);
        assert_eq!(motor.queued_actuation(), None);
        motor.tick_auto_stop(0.5);
        assert_eq!(motor.queued_actuation(), Some(Actuation { value: 0.0, duration: 0.0 }));

        motor.take_queued_actuation();
        motor.tick_auto_stop(10.0);
        assert_eq!(motor.queued_actuation(), None);
    }

    #[test]
    fn indefinite_actuation_cancels_pending_auto_stop() {
        let mut motor = actuator(CommandSlot::Scalar(0), "Vibrate");
        motor.actuate(0.6, 1.0);
        motor.actuate(0.3, 0.0);
        motor.take_queued_actuation();
        motor.tick_auto_stop(5.0);
        assert_eq!(motor.queued_actuation(), None);
    }

    #[test]
    fn subscribe_uses_the_subscribe_slot() {
        let mut button = sensor(CommandSlot::SensorSubscribe(2), "Button");
        let mut queue = Vec::new();
        let mut events = Vec::new();
        let mut feature = view(&mut button, &mut queue, &mut events);
        feature.subscribe();
        feature.unsubscribe();
        assert_eq!(
            queue,
            vec![
                Message::SensorSubscribeCmd(SensorSubscribeCmd {
                    id: 0,
                    device_index: 3,
                    sensor_index: 2,
                    sensor_type: "Button".to_string(),
                }),
                Message::SensorUnsubscribeCmd(SensorUnsubscribeCmd {
                    id: 0,
                    device_index: 3,
                    sensor_index: 2,
                    sensor_type: "Button".to_string(),
                }),
            ]
        );
    }

    #[test]
    fn subscribe_is_ignored_for_poll_only_sensors() {
        let mut battery = sensor(CommandSlot::SensorRead(0), "Battery");
        let mut queue = Vec::new();
        let mut events = Vec::new();
        view(&mut battery, &mut queue, &mut events).subscribe();
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_async_reads_share_one_request() {
        let mut battery = sensor(CommandSlot::SensorRead(0), "Battery");
        let mut queue = Vec::new();
        let mut events = Vec::new();
        let mut feature = view(&mut battery, &mut queue, &mut events);

        let mut first = feature.async_read();
        let mut second = feature.async_read();
        assert!(first.try_result().is_none());
        assert!(second.try_result().is_none());

        feature.set_sensor_reading(vec![42]);
        assert_eq!(first.try_result().unwrap().unwrap(), vec![42]);
        assert_eq!(second.try_result().unwrap().unwrap(), vec![42]);

        assert_eq!(queue.len(), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(battery.last_sensor_reading(), &[42]);
    }

    #[test]
    fn abandoned_reads_do_not_block_new_requests() {
        let mut battery = sensor(CommandSlot::SensorRead(0), "Battery");
        let mut queue = Vec::new();
        let mut events = Vec::new();
        let mut feature = view(&mut battery, &mut queue, &mut events);

        drop(feature.async_read());
        let mut handle = feature.async_read();
        feature.set_sensor_reading(vec![7]);

        assert_eq!(handle.try_result().unwrap().unwrap(), vec![7]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn unpollable_sensor_resolves_immediately_with_nothing() {
        let mut button = sensor(CommandSlot::SensorSubscribe(0), "Button");
        let mut queue = Vec::new();
        let mut events = Vec::new();
        let mut handle = view(&mut button, &mut queue, &mut events).async_read();

        assert_eq!(handle.try_result().unwrap().unwrap(), Vec::<i32>::new());
        assert!(queue.is_empty());
        assert_eq!(
            events,
            vec![ClientEvent::SensorReading {
                device_index: 3,
                feature_index: 0,
                feature_type: FeatureType::Button,
                data: Vec::new(),
            }]
        );
    }

    #[test]
    fn async_read_can_be_awaited() {
        let mut battery = sensor(CommandSlot::SensorRead(0), "Battery");
        let mut queue = Vec::new();
        let mut events = Vec::new();
        let mut feature = view(&mut battery, &mut queue, &mut events);
        let handle = feature.async_read();
        feature.set_sensor_reading(vec![55]);
        assert_eq!(futures::executor::block_on(handle).unwrap(), vec![55]);
    }
}
