// src/buttplug/device.rs

//! A device known to the session, and the per-tick command scheduler that
//! turns its features' queued actuations into batched protocol messages.

use std::ops::{Deref, DerefMut};

use log::trace;

use super::events::{DeviceInfo, EventSink};
use super::feature::{CommandSlot, Feature, FeatureMut, FeatureType};
use super::message::{
    DeviceMessageInfo, LinearCmd, Message, MessageAttributes, RotateCmd, RotationSubcommand,
    ScalarCmd, ScalarSubcommand, StopDeviceCmd, VectorSubcommand,
};

/// Returned by [`Device::battery_level`] when no level is known.
pub const UNKNOWN_BATTERY_LEVEL: f64 = -1.0;

#[derive(Debug)]
pub struct Device {
    index: u32,
    name: String,
    display_name: String,
    /// Seconds.
    default_message_timing_gap: f64,
    message_timing_gap_override: Option<f64>,
    connected: bool,
    features: Vec<Feature>,
    message_queue: Vec<Message>,
    stop_requested: bool,
    time_since_last_message: f64,
}

impl Device {
    /// Builds a device and its features from a server description. Features
    /// are created in command-list order: scalar, linear, rotate, sensor read,
    /// sensor subscribe.
    pub fn from_server_info(info: &DeviceMessageInfo) -> Self {
        let messages = &info.device_messages;
        let slots: [(&Vec<MessageAttributes>, fn(u32) -> CommandSlot); 5] = [
            (&messages.scalar_cmd, CommandSlot::Scalar),
            (&messages.linear_cmd, CommandSlot::Linear),
            (&messages.rotate_cmd, CommandSlot::Rotate),
            (&messages.sensor_read_cmd, CommandSlot::SensorRead),
            (&messages.sensor_subscribe_cmd, CommandSlot::SensorSubscribe),
        ];

        let mut features = Vec::new();
        for (attributes, slot) in slots {
            for (index, attribute) in (0u32..).zip(attributes.iter()) {
                features.push(Feature::from_attributes(slot(index), attribute));
            }
        }

        Self {
            index: info.device_index,
            name: info.device_name.clone(),
            display_name: info.device_display_name.clone(),
            default_message_timing_gap: f64::from(info.device_message_timing_gap) / 1000.0,
            message_timing_gap_override: None,
            connected: false,
            features,
            message_queue: Vec::new(),
            stop_requested: false,
            time_since_last_message: 0.0,
        }
    }

    /// Does a server description refer to this same logical device?
    pub(crate) fn has_identity_of(&self, info: &DeviceMessageInfo) -> bool {
        self.name == info.device_name && self.display_name == info.device_display_name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// The name the server reported for the hardware.
    pub fn descriptive_name(&self) -> &str {
        &self.name
    }

    /// The user-assigned display name, or the descriptive name if none is set.
    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            index: self.index,
            name: self.name.clone(),
            display_name: self.display_name.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Marking a device disconnected drops everything it had queued, so
    /// nothing stale is sent after the server comes back.
    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        if !connected {
            self.stop_requested = false;
            self.message_queue.clear();
            for feature in &mut self.features {
                feature.clear_queued_actuation();
            }
        }
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn feature(&self, feature_index: usize) -> Option<&Feature> {
        self.features.get(feature_index)
    }

    pub fn feature_mut<'a>(
        &'a mut self,
        feature_index: usize,
        events: &'a mut dyn EventSink,
    ) -> Option<FeatureMut<'a>> {
        let feature = self.features.get_mut(feature_index)?;
        Some(FeatureMut {
            feature,
            device_index: self.index,
            feature_index,
            queue: &mut self.message_queue,
            events,
        })
    }

    pub fn actuators(&self, feature_type: FeatureType) -> impl Iterator<Item = &Feature> {
        self.features
            .iter()
            .filter(move |f| f.feature_type() == feature_type && f.is_actuator())
    }

    pub fn sensors(&self, feature_type: FeatureType) -> impl Iterator<Item = &Feature> {
        self.features
            .iter()
            .filter(move |f| f.feature_type() == feature_type && f.is_sensor())
    }

    pub fn can_actuate(&self, feature_type: FeatureType) -> bool {
        self.actuators(feature_type).next().is_some()
    }

    pub fn can_vibrate(&self) -> bool {
        self.can_actuate(FeatureType::Vibrate)
    }

    pub fn can_rotate(&self) -> bool {
        self.can_actuate(FeatureType::Rotate)
    }

    pub fn can_oscillate(&self) -> bool {
        self.can_actuate(FeatureType::Oscillate)
    }

    pub fn can_constrict(&self) -> bool {
        self.can_actuate(FeatureType::Constrict)
    }

    pub fn can_inflate(&self) -> bool {
        self.can_actuate(FeatureType::Inflate)
    }

    pub fn can_position(&self) -> bool {
        self.can_actuate(FeatureType::Position)
    }

    pub fn can_sense(&self, feature_type: FeatureType) -> bool {
        self.sensors(feature_type).next().is_some()
    }

    /// Minimum time between command batches, in seconds.
    pub fn message_timing_gap(&self) -> f64 {
        match self.message_timing_gap_override {
            Some(gap) if gap >= 0.0 => gap,
            _ => self.default_message_timing_gap,
        }
    }

    /// Overrides the server's timing gap. `None` or a negative value restores it.
    pub fn set_message_timing_gap(&mut self, gap: Option<f64>) {
        self.message_timing_gap_override = gap;
    }

    /// Actuates every actuator of the given type. Ignored while disconnected.
    pub fn actuate_all(&mut self, feature_type: FeatureType, value: f64, duration: f64) {
        if !self.connected {
            return;
        }
        for feature in &mut self.features {
            if feature.feature_type() == feature_type && feature.is_actuator() {
                feature.actuate(value, duration);
            }
        }
    }

    pub fn vibrate_all(&mut self, value: f64, duration: f64) {
        self.actuate_all(FeatureType::Vibrate, value, duration);
    }

    /// Negative values rotate counter-clockwise.
    pub fn rotate_all(&mut self, value: f64, duration: f64) {
        self.actuate_all(FeatureType::Rotate, value, duration);
    }

    pub fn oscillate_all(&mut self, value: f64, duration: f64) {
        self.actuate_all(FeatureType::Oscillate, value, duration);
    }

    pub fn constrict_all(&mut self, value: f64, duration: f64) {
        self.actuate_all(FeatureType::Constrict, value, duration);
    }

    pub fn inflate_all(&mut self, value: f64, duration: f64) {
        self.actuate_all(FeatureType::Inflate, value, duration);
    }

    /// `duration` is the time the move should take.
    pub fn position_all(&mut self, value: f64, duration: f64) {
        self.actuate_all(FeatureType::Position, value, duration);
    }

    /// Sets every actuator of the given type to zero, indefinitely.
    pub fn stop_all(&mut self, feature_type: FeatureType) {
        self.actuate_all(feature_type, 0.0, 0.0);
    }

    /// Requests a full device stop on the next send. It supersedes any
    /// actuation queued for the same batch.
    pub fn stop(&mut self) {
        if !self.connected {
            return;
        }
        self.stop_requested = true;
    }

    pub fn has_battery_level(&self) -> bool {
        self.can_sense(FeatureType::Battery)
    }

    /// Battery level as a fraction of the sensor's range, or
    /// [`UNKNOWN_BATTERY_LEVEL`] if there is no reading yet.
    pub fn battery_level(&self) -> f64 {
        let Some(battery) = self.sensors(FeatureType::Battery).next() else {
            return UNKNOWN_BATTERY_LEVEL;
        };
        let (Some(&level), Some(range)) =
            (battery.last_sensor_reading().first(), battery.sensor_range().first())
        else {
            return UNKNOWN_BATTERY_LEVEL;
        };
        let span = f64::from(range.max) - f64::from(range.min);
        if span == 0.0 {
            return UNKNOWN_BATTERY_LEVEL;
        }
        (f64::from(level) - f64::from(range.min)) / span
    }

    pub(crate) fn tick_auto_stops(&mut self, delta_time: f64) {
        for feature in &mut self.features {
            feature.tick_auto_stop(delta_time);
        }
    }

    /// Collects everything queued for this device into outbound messages,
    /// at most once per timing gap.
    ///
    /// Actuations are batched into at most one `LinearCmd`, one `RotateCmd`
    /// and one `ScalarCmd`, followed by queued sensor commands in the order
    /// they were requested. Message ids are left at zero for the session to
    /// assign.
    pub fn flush_message_queue(&mut self, delta_time: f64) -> Vec<Message> {
        self.time_since_last_message += delta_time;
        let gap = self.message_timing_gap();
        if self.time_since_last_message < gap {
            return Vec::new();
        }

        let device_index = self.index;
        let mut outbound = Vec::new();
        if self.stop_requested {
            self.stop_requested = false;
            outbound.push(StopDeviceCmd { id: 0, device_index }.into());
            for feature in &mut self.features {
                feature.take_queued_actuation();
            }
        } else {
            let mut linear: Option<LinearCmd> = None;
            let mut rotate: Option<RotateCmd> = None;
            let mut scalar: Option<ScalarCmd> = None;

            for feature in &mut self.features {
                let Some(actuation) = feature.take_queued_actuation() else {
                    continue;
                };
                match feature.command_slot() {
                    CommandSlot::Linear(index) => linear
                        .get_or_insert_with(|| LinearCmd {
                            id: 0,
                            device_index,
                            vectors: Vec::new(),
                        })
                        .vectors
                        .push(VectorSubcommand {
                            index,
                            duration: (actuation.duration * 1000.0).round() as u32,
                            position: actuation.value,
                        }),
                    CommandSlot::Rotate(index) => rotate
                        .get_or_insert_with(|| RotateCmd {
                            id: 0,
                            device_index,
                            rotations: Vec::new(),
                        })
                        .rotations
                        .push(RotationSubcommand {
                            index,
                            speed: actuation.value.abs(),
                            clockwise: actuation.value >= 0.0,
                        }),
                    CommandSlot::Scalar(index) => scalar
                        .get_or_insert_with(|| ScalarCmd {
                            id: 0,
                            device_index,
                            scalars: Vec::new(),
                        })
                        .scalars
                        .push(ScalarSubcommand {
                            index,
                            scalar: actuation.value,
                            actuator_type: feature.feature_type().as_str().to_string(),
                        }),
                    CommandSlot::SensorRead(_) | CommandSlot::SensorSubscribe(_) => {}
                }
            }

            outbound.extend(linear.map(Message::from));
            outbound.extend(rotate.map(Message::from));
            outbound.extend(scalar.map(Message::from));
        }
        outbound.append(&mut self.message_queue);

        if !outbound.is_empty() {
            trace!("Device {} flushing {} message(s)", self.index, outbound.len());
            // Carry the overshoot into the next interval, but never more than
            // one tick's worth, so an idle device cannot bank a burst.
            self.time_since_last_message =
                (self.time_since_last_message - gap).clamp(0.0, delta_time.max(0.0));
        }
        outbound
    }
}

/// A device borrowed from its session, able to hand out [`FeatureMut`]s.
pub struct DeviceMut<'a> {
    pub(crate) device: &'a mut Device,
    pub(crate) events: &'a mut dyn EventSink,
}

impl DeviceMut<'_> {
    pub fn feature_mut(&mut self, feature_index: usize) -> Option<FeatureMut<'_>> {
        self.device.feature_mut(feature_index, &mut *self.events)
    }

    /// Polls every sensor of the given type.
    pub fn read_all(&mut self, feature_type: FeatureType) {
        for feature_index in 0..self.device.features.len() {
            if let Some(mut feature) = self.feature_mut(feature_index) {
                if feature.feature_type() == feature_type && feature.is_sensor() {
                    feature.read();
                }
            }
        }
    }
}

impl Deref for DeviceMut<'_> {
    type Target = Device;

    fn deref(&self) -> &Device {
        &*self.device
    }
}

impl DerefMut for DeviceMut<'_> {
    fn deref_mut(&mut self) -> &mut Device {
        &mut *self.device
    }
}
