// src/buttplug/message.rs

//! Buttplug protocol messages (message spec version 3).
//!
//! On the wire a batch is a JSON array of single-key objects, the key being
//! the message type name and the value that message's fields:
//!
//! ```json
//! [{"RequestServerInfo":{"Id":1,"ClientName":"X","MessageVersion":3}}]
//! ```
//!
//! Raw endpoint messages are deliberately not modelled.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::DecodeError;

/// The protocol message version this client speaks.
pub const SPEC_VERSION: u32 = 3;

macro_rules! protocol_messages {
    ($($(#[$meta:meta])* $variant:ident($payload:ident) => $handler:ident,)+) => {
        /// A single protocol message. The variant name is the wire type name.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum Message {
            $($(#[$meta])* $variant($payload),)+
        }

        /// The type of a [`Message`], without its payload.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageKind {
            $($variant,)+
        }

        impl MessageKind {
            pub const ALL: &'static [MessageKind] = &[$(MessageKind::$variant,)+];

            /// The exact protocol name of this message type.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(MessageKind::$variant => stringify!($variant),)+
                }
            }
        }

        impl Message {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(Message::$variant(_) => MessageKind::$variant,)+
                }
            }

            pub fn id(&self) -> u32 {
                match self {
                    $(Message::$variant(message) => message.id,)+
                }
            }

            pub fn set_id(&mut self, id: u32) {
                match self {
                    $(Message::$variant(message) => message.id = id,)+
                }
            }

            /// Hands the payload to the handler method matching this message's type.
            pub fn dispatch<H: MessageHandler + ?Sized>(self, handler: &mut H) -> H::Output {
                match self {
                    $(Message::$variant(message) => handler.$handler(message),)+
                }
            }
        }

        /// Receives messages routed by [`Message::dispatch`].
        ///
        /// Every method defaults to [`MessageHandler::unhandled`], so an
        /// implementor only overrides the message types it cares about.
        pub trait MessageHandler {
            type Output;

            fn unhandled(&mut self, kind: MessageKind, id: u32) -> Self::Output;

            $(
                fn $handler(&mut self, message: $payload) -> Self::Output {
                    self.unhandled(MessageKind::$variant, message.id)
                }
            )+
        }

        $(
            impl From<$payload> for Message {
                fn from(message: $payload) -> Self {
                    Message::$variant(message)
                }
            }
        )+
    };
}

protocol_messages! {
    /// Server acknowledgement of a client message.
    Ok(OkReply) => on_ok,
    /// Server failure reply, or an unsolicited server error.
    Error(ErrorReply) => on_error,
    Ping(Ping) => on_ping,
    RequestServerInfo(RequestServerInfo) => on_request_server_info,
    ServerInfo(ServerInfo) => on_server_info,
    StartScanning(StartScanning) => on_start_scanning,
    StopScanning(StopScanning) => on_stop_scanning,
    ScanningFinished(ScanningFinished) => on_scanning_finished,
    RequestDeviceList(RequestDeviceList) => on_request_device_list,
    DeviceList(DeviceList) => on_device_list,
    DeviceAdded(DeviceAdded) => on_device_added,
    DeviceRemoved(DeviceRemoved) => on_device_removed,
    StopDeviceCmd(StopDeviceCmd) => on_stop_device_cmd,
    StopAllDevices(StopAllDevices) => on_stop_all_devices,
    ScalarCmd(ScalarCmd) => on_scalar_cmd,
    LinearCmd(LinearCmd) => on_linear_cmd,
    RotateCmd(RotateCmd) => on_rotate_cmd,
    SensorReadCmd(SensorReadCmd) => on_sensor_read_cmd,
    SensorReading(SensorReading) => on_sensor_reading,
    SensorSubscribeCmd(SensorSubscribeCmd) => on_sensor_subscribe_cmd,
    SensorUnsubscribeCmd(SensorUnsubscribeCmd) => on_sensor_unsubscribe_cmd,
}

impl MessageKind {
    /// Case-sensitive lookup of a protocol type name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }

    /// Messages that only a client may send. Receiving one from a server is a
    /// protocol violation.
    pub fn is_client_only(self) -> bool {
        matches!(
            self,
            MessageKind::RequestServerInfo
                | MessageKind::StartScanning
                | MessageKind::StopScanning
                | MessageKind::RequestDeviceList
                | MessageKind::StopDeviceCmd
                | MessageKind::StopAllDevices
                | MessageKind::ScalarCmd
                | MessageKind::LinearCmd
                | MessageKind::RotateCmd
                | MessageKind::SensorReadCmd
                | MessageKind::SensorSubscribeCmd
                | MessageKind::SensorUnsubscribeCmd
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encodes a batch of messages as one JSON array.
pub fn encode(messages: &[Message]) -> Result<String, serde_json::Error> {
    serde_json::to_string(messages)
}

/// Decodes one inbound frame. A single bad entry fails the whole batch.
///
/// Every key of every object becomes one message, in document order.
pub fn decode(text: &str) -> Result<Vec<Message>, DecodeError> {
    let entries: Vec<Value> = serde_json::from_str(text)?;
    let mut messages = Vec::with_capacity(entries.len());
    for (position, entry) in entries.into_iter().enumerate() {
        let Value::Object(object) = entry else {
            return Err(DecodeError::NotAnObject { position });
        };
        if object.is_empty() {
            return Err(DecodeError::EmptyObject { position });
        }
        for (name, payload) in object {
            let kind = MessageKind::from_name(&name)
                .ok_or_else(|| DecodeError::UnknownMessageType(name.clone()))?;
            let mut single = Map::with_capacity(1);
            single.insert(name, payload);
            let message = serde_json::from_value(Value::Object(single))
                .map_err(|source| DecodeError::InvalidPayload { kind, source })?;
            messages.push(message);
        }
    }
    Ok(messages)
}

/// Error classes reported by a server in an `Error` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ErrorCode {
    #[default]
    Unknown,
    Init,
    Ping,
    Msg,
    Device,
}

impl From<u8> for ErrorCode {
    fn from(code: u8) -> Self {
        match code {
            1 => ErrorCode::Init,
            2 => ErrorCode::Ping,
            3 => ErrorCode::Msg,
            4 => ErrorCode::Device,
            _ => ErrorCode::Unknown,
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Unknown => 0,
            ErrorCode::Init => 1,
            ErrorCode::Ping => 2,
            ErrorCode::Msg => 3,
            ErrorCode::Device => 4,
        }
    }
}

// Status messages

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OkReply {
    pub id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorReply {
    pub id: u32,
    #[serde(default)]
    pub error_message: String,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ping {
    pub id: u32,
}

// Handshake messages

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestServerInfo {
    pub id: u32,
    pub client_name: String,
    pub message_version: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
    pub id: u32,
    #[serde(default)]
    pub server_name: String,
    pub message_version: u32,
    /// Milliseconds; zero means the server does not require pings.
    pub max_ping_time: u32,
}

// Enumeration messages

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartScanning {
    pub id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopScanning {
    pub id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanningFinished {
    pub id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestDeviceList {
    pub id: u32,
}

/// Inclusive range of one sensor reading dimension, `[min, max]` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct SensorRange {
    pub min: i32,
    pub max: i32,
}

impl From<[i32; 2]> for SensorRange {
    fn from([min, max]: [i32; 2]) -> Self {
        Self { min, max }
    }
}

impl From<SensorRange> for [i32; 2] {
    fn from(range: SensorRange) -> Self {
        [range.min, range.max]
    }
}

/// One entry of a device's per-command attribute list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageAttributes {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feature_descriptor: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub step_count: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actuator_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sensor_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensor_range: Vec<SensorRange>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// Attribute lists keyed by the command a feature is driven through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceMessages {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scalar_cmd: Vec<MessageAttributes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linear_cmd: Vec<MessageAttributes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rotate_cmd: Vec<MessageAttributes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensor_read_cmd: Vec<MessageAttributes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensor_subscribe_cmd: Vec<MessageAttributes>,
}

/// A device as described by the server in `DeviceList` and `DeviceAdded`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceMessageInfo {
    pub device_name: String,
    pub device_index: u32,
    /// Milliseconds.
    #[serde(default)]
    pub device_message_timing_gap: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_display_name: String,
    #[serde(default)]
    pub device_messages: DeviceMessages,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceList {
    pub id: u32,
    pub devices: Vec<DeviceMessageInfo>,
}

/// The device fields sit directly in the message object, next to `Id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAdded {
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(flatten)]
    pub device: DeviceMessageInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceRemoved {
    pub id: u32,
    pub device_index: u32,
}

// Device messages

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopDeviceCmd {
    pub id: u32,
    pub device_index: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopAllDevices {
    pub id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScalarSubcommand {
    pub index: u32,
    pub scalar: f64,
    pub actuator_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScalarCmd {
    pub id: u32,
    pub device_index: u32,
    pub scalars: Vec<ScalarSubcommand>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VectorSubcommand {
    pub index: u32,
    /// Milliseconds.
    pub duration: u32,
    pub position: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinearCmd {
    pub id: u32,
    pub device_index: u32,
    pub vectors: Vec<VectorSubcommand>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RotationSubcommand {
    pub index: u32,
    pub speed: f64,
    pub clockwise: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RotateCmd {
    pub id: u32,
    pub device_index: u32,
    pub rotations: Vec<RotationSubcommand>,
}

// Sensor messages

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorReadCmd {
    pub id: u32,
    pub device_index: u32,
    pub sensor_index: u32,
    pub sensor_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorReading {
    pub id: u32,
    pub device_index: u32,
    pub sensor_index: u32,
    pub sensor_type: String,
    pub data: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorSubscribeCmd {
    pub id: u32,
    pub device_index: u32,
    pub sensor_index: u32,
    pub sensor_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorUnsubscribeCmd {
    pub id: u32,
    pub device_index: u32,
    pub sensor_index: u32,
    pub sensor_type: String,
}
