use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Error;
use crate::timestamp;

use chrono::{DateTime, Utc};

/// Discriminant for [`Payload`], mirrored from `MessageType` in the original
/// `astrocomm::Message` (`messageTypeToString` / `stringToMessageType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Command,
    Response,
    Event,
    Error,
    DiscoveryRequest,
    DiscoveryResponse,
    Registration,
    Authentication,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Command => "COMMAND",
            MessageType::Response => "RESPONSE",
            MessageType::Event => "EVENT",
            MessageType::Error => "ERROR",
            MessageType::DiscoveryRequest => "DISCOVERY_REQUEST",
            MessageType::DiscoveryResponse => "DISCOVERY_RESPONSE",
            MessageType::Registration => "REGISTRATION",
            MessageType::Authentication => "AUTHENTICATION",
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "COMMAND" => MessageType::Command,
            "RESPONSE" => MessageType::Response,
            "EVENT" => MessageType::Event,
            "ERROR" => MessageType::Error,
            "DISCOVERY_REQUEST" => MessageType::DiscoveryRequest,
            "DISCOVERY_RESPONSE" => MessageType::DiscoveryResponse,
            "REGISTRATION" => MessageType::Registration,
            "AUTHENTICATION" => MessageType::Authentication,
            other => return Err(Error::UnknownMessageType(other.to_string())),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality-of-service level for outbound delivery. See spec glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QosLevel {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QosLevel {
    fn as_u8(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QosLevel::AtMostOnce),
            1 => Some(QosLevel::AtLeastOnce),
            2 => Some(QosLevel::ExactlyOnce),
            _ => None,
        }
    }

    /// Whether this QoS level requires the Message Queue Manager's retry
    /// tracking, rather than a fire-and-forget send.
    pub fn requires_tracking(self) -> bool {
        !matches!(self, QosLevel::AtMostOnce)
    }
}

/// Scheduling preference within the retry queue. Higher priority value is
/// serviced first on retry cycles (spec section 4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    fn as_u8(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Priority::Low),
            1 => Some(Priority::Normal),
            2 => Some(Priority::High),
            3 => Some(Priority::Critical),
            _ => None,
        }
    }

    pub fn is_urgent(self) -> bool {
        matches!(self, Priority::High | Priority::Critical)
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn is_empty_object(v: &Value) -> bool {
    matches!(v, Value::Object(m) if m.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub command: String,
    #[serde(default = "empty_object", skip_serializing_if = "is_empty_object")]
    pub parameters: Value,
    #[serde(default = "empty_object", skip_serializing_if = "is_empty_object")]
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(rename = "relatedMessageId", default, skip_serializing_if = "Option::is_none")]
    pub related_message_id: Option<Uuid>,
}

impl EventMessage {
    pub const PROPERTY_CHANGED: &'static str = "PROPERTY_CHANGED";

    pub fn is_property_changed(&self) -> bool {
        self.event == Self::PROPERTY_CHANGED
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(rename = "errorCode")]
    pub error_code: String,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRequestMessage {
    #[serde(rename = "deviceTypes", default)]
    pub device_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponseMessage {
    #[serde(default = "empty_devices")]
    pub devices: Value,
}

fn empty_devices() -> Value {
    Value::Array(Vec::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationMessage {
    #[serde(rename = "deviceInfo")]
    pub device_info: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationMessage {
    pub method: String,
    pub credentials: String,
}

/// The eight wire message variants (spec section 3), as a tagged sum type
/// rather than the original's inheritance + factory hierarchy: exhaustive
/// `match` in the Message Processor's receive loop is then a compile-time
/// check, per REDESIGN FLAGS.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Command(CommandMessage),
    Response(ResponseMessage),
    Event(EventMessage),
    Error(ErrorMessage),
    DiscoveryRequest(DiscoveryRequestMessage),
    DiscoveryResponse(DiscoveryResponseMessage),
    Registration(RegistrationMessage),
    Authentication(AuthenticationMessage),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Command(_) => MessageType::Command,
            Payload::Response(_) => MessageType::Response,
            Payload::Event(_) => MessageType::Event,
            Payload::Error(_) => MessageType::Error,
            Payload::DiscoveryRequest(_) => MessageType::DiscoveryRequest,
            Payload::DiscoveryResponse(_) => MessageType::DiscoveryResponse,
            Payload::Registration(_) => MessageType::Registration,
            Payload::Authentication(_) => MessageType::Authentication,
        }
    }

    fn to_fields(&self) -> Map<String, Value> {
        let value = match self {
            Payload::Command(v) => serde_json::to_value(v),
            Payload::Response(v) => serde_json::to_value(v),
            Payload::Event(v) => serde_json::to_value(v),
            Payload::Error(v) => serde_json::to_value(v),
            Payload::DiscoveryRequest(v) => serde_json::to_value(v),
            Payload::DiscoveryResponse(v) => serde_json::to_value(v),
            Payload::Registration(v) => serde_json::to_value(v),
            Payload::Authentication(v) => serde_json::to_value(v),
        }
        .expect("payload variants always serialize to a JSON object");

        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Builds a payload from its `messageType` tag and the envelope's
    /// remaining fields. Accepts both the flat (new) layout and the legacy
    /// `payload`-nested layout: if a `payload` object is present, its keys
    /// fill in for any flat field that is absent (flat fields win on
    /// conflict, since new clients emit flat).
    fn from_type_and_fields(message_type: &str, mut fields: Map<String, Value>) -> Result<Self, Error> {
        if let Some(Value::Object(nested)) = fields.remove("payload") {
            for (k, v) in nested {
                fields.entry(k).or_insert(v);
            }
        }
        let value = Value::Object(fields);
        Ok(match message_type {
            "COMMAND" => Payload::Command(serde_json::from_value(value)?),
            "RESPONSE" => Payload::Response(serde_json::from_value(value)?),
            "EVENT" => Payload::Event(serde_json::from_value(value)?),
            "ERROR" => Payload::Error(serde_json::from_value(value)?),
            "DISCOVERY_REQUEST" => Payload::DiscoveryRequest(serde_json::from_value(value)?),
            "DISCOVERY_RESPONSE" => Payload::DiscoveryResponse(serde_json::from_value(value)?),
            "REGISTRATION" => Payload::Registration(serde_json::from_value(value)?),
            "AUTHENTICATION" => Payload::Authentication(serde_json::from_value(value)?),
            other => return Err(Error::UnknownMessageType(other.to_string())),
        })
    }
}

/// The common envelope every message on the wire carries, wrapping a typed
/// [`Payload`]. See spec section 3 for field semantics and section 6 for
/// the wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub device_id: Option<String>,
    pub original_message_id: Option<Uuid>,
    pub qos: QosLevel,
    pub priority: Priority,
    pub expire_after_seconds: u64,
    pub payload: Payload,
}

impl Message {
    /// Constructs a new message with a freshly generated id and the current
    /// timestamp, `AT_MOST_ONCE` / `NORMAL` defaults, never expiring.
    pub fn new(payload: Payload) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: timestamp::now(),
            device_id: None,
            original_message_id: None,
            qos: QosLevel::default(),
            priority: Priority::default(),
            expire_after_seconds: 0,
            payload,
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_original_message_id(mut self, id: Uuid) -> Self {
        self.original_message_id = Some(id);
        self
    }

    pub fn with_qos(mut self, qos: QosLevel) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expire_after_seconds(mut self, seconds: u64) -> Self {
        self.expire_after_seconds = seconds;
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// True iff `expire_after_seconds > 0` and `now - timestamp >= expire_after_seconds`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.expire_after_seconds == 0 {
            return false;
        }
        let age = (now - self.timestamp).num_seconds();
        age >= 0 && age as u64 >= self.expire_after_seconds
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(timestamp::now())
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(s)?)
    }

    /// Is this a response-shaped message (`RESPONSE`, `ERROR`, or
    /// `DISCOVERY_RESPONSE`) that correlates to a prior request via
    /// `original_message_id`? Used by the Message Processor's receive loop.
    pub fn correlatable_original_id(&self) -> Option<Uuid> {
        match self.payload {
            Payload::Response(_) | Payload::Error(_) | Payload::DiscoveryResponse(_) => {
                self.original_message_id
            }
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.message_type(), self.message_id)?;
        if let Some(device_id) = &self.device_id {
            write!(f, " device={device_id}")?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "messageType")]
    message_type: String,
    #[serde(rename = "messageId")]
    message_id: Uuid,
    #[serde(with = "timestamp")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(rename = "originalMessageId", default, skip_serializing_if = "Option::is_none")]
    original_message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qos: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<u8>,
    #[serde(rename = "expireAfter", default, skip_serializing_if = "Option::is_none")]
    expire_after: Option<u64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<Message> for WireMessage {
    fn from(m: Message) -> Self {
        WireMessage {
            message_type: m.payload.message_type().as_str().to_string(),
            message_id: m.message_id,
            timestamp: m.timestamp,
            device_id: m.device_id,
            original_message_id: m.original_message_id,
            qos: (m.qos != QosLevel::default()).then(|| m.qos.as_u8()),
            priority: (m.priority != Priority::default()).then(|| m.priority.as_u8()),
            expire_after: (m.expire_after_seconds != 0).then_some(m.expire_after_seconds),
            extra: m.payload.to_fields(),
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let qos = match wire.qos {
            Some(v) => QosLevel::from_u8(v)
                .ok_or_else(|| Error::Malformed(format!("invalid qos value {v}")))?,
            None => QosLevel::default(),
        };
        let priority = match wire.priority {
            Some(v) => Priority::from_u8(v)
                .ok_or_else(|| Error::Malformed(format!("invalid priority value {v}")))?,
            None => Priority::default(),
        };
        let payload = Payload::from_type_and_fields(&wire.message_type, wire.extra)?;

        Ok(Message {
            message_id: wire.message_id,
            timestamp: wire.timestamp,
            device_id: wire.device_id,
            original_message_id: wire.original_message_id,
            qos,
            priority,
            expire_after_seconds: wire.expire_after.unwrap_or(0),
            payload,
        })
    }
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireMessage::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireMessage::deserialize(deserializer)?;
        Message::try_from(wire).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_command() -> Message {
        Message::new(Payload::Command(CommandMessage {
            command: "snap".into(),
            parameters: serde_json::json!({"exposure": 1.0}),
            properties: empty_object(),
        }))
        .with_device_id("cam01")
        .with_qos(QosLevel::AtLeastOnce)
        .with_priority(Priority::High)
        .with_expire_after_seconds(30)
    }

    #[test]
    fn round_trips_command() {
        let m = sample_command();
        let json = m.to_json().unwrap();
        let back = Message::from_json(&json).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn omits_default_qos_priority_expiry() {
        let m = Message::new(Payload::Command(CommandMessage {
            command: "ping".into(),
            parameters: empty_object(),
            properties: empty_object(),
        }));
        let json = m.to_json().unwrap();
        assert!(!json.contains("\"qos\""));
        assert!(!json.contains("\"priority\""));
        assert!(!json.contains("\"expireAfter\""));
    }

    #[test]
    fn response_correlates_via_original_message_id() {
        let req_id = Uuid::new_v4();
        let resp = Message::new(Payload::Response(ResponseMessage {
            status: "success".into(),
            command: Some("snap".into()),
            properties: Some(serde_json::json!({"echo": {"exposure": 1.0}})),
            details: None,
        }))
        .with_original_message_id(req_id);
        assert_eq!(resp.correlatable_original_id(), Some(req_id));
    }

    #[test]
    fn accepts_legacy_nested_payload_form() {
        let id = Uuid::new_v4();
        let legacy = serde_json::json!({
            "messageType": "COMMAND",
            "messageId": id,
            "timestamp": "2026-01-01T00:00:00.000Z",
            "payload": { "command": "snap", "parameters": {"exposure": 2.0} }
        });
        let msg: Message = serde_json::from_value(legacy).unwrap();
        match msg.payload {
            Payload::Command(c) => {
                assert_eq!(c.command, "snap");
                assert_eq!(c.parameters["exposure"], 2.0);
            }
            _ => panic!("expected command"),
        }
    }

    #[test]
    fn expiry_zero_never_expires() {
        let m = sample_command().with_expire_after_seconds(0);
        assert!(!m.is_expired_at(timestamp::now() + chrono::Duration::days(365)));
    }

    #[test]
    fn expiry_one_second_expires_after_one_second() {
        let m = sample_command().with_expire_after_seconds(1);
        assert!(!m.is_expired_at(m.timestamp));
        assert!(m.is_expired_at(m.timestamp + chrono::Duration::seconds(2)));
    }

    #[test]
    fn property_changed_detection() {
        let e = EventMessage {
            event: "PROPERTY_CHANGED".into(),
            properties: Some(serde_json::json!({"ra": {"value": 10.5}})),
            details: None,
            related_message_id: None,
        };
        assert!(e.is_property_changed());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let bad = serde_json::json!({
            "messageType": "NOT_A_TYPE",
            "messageId": Uuid::new_v4(),
            "timestamp": "2026-01-01T00:00:00.000Z",
        });
        assert!(serde_json::from_value::<Message>(bad).is_err());
    }
}
