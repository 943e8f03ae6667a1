use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::command::Command;
use crate::generate_id;
use crate::outcome::Outcome;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    Response,
    Error,
    Init,
    Ping,
    Pong,
    /// Any `type` string this version does not know about.
    Unknown(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Response => "response",
            MessageKind::Error => "error",
            MessageKind::Init => "init",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Unknown(raw) => raw,
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "command" => MessageKind::Command,
            "response" => MessageKind::Response,
            "error" => MessageKind::Error,
            "init" => MessageKind::Init,
            "ping" => MessageKind::Ping,
            "pong" => MessageKind::Pong,
            other => MessageKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(MessageKind::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidJson,
    InvalidEnvelope,
    UnknownMessageType,
    DuplicateCommandId,
    NotInitialized,
    SessionClosed,
    TranslationFailed,
    EngineFault,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidJson => "invalid_json",
            ErrorCode::InvalidEnvelope => "invalid_envelope",
            ErrorCode::UnknownMessageType => "unknown_message_type",
            ErrorCode::DuplicateCommandId => "duplicate_command_id",
            ErrorCode::NotInitialized => "not_initialized",
            ErrorCode::SessionClosed => "session_closed",
            ErrorCode::TranslationFailed => "translation_failed",
            ErrorCode::EngineFault => "engine_fault",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitAck {
    pub session_id: String,
    pub client_type: String,
}

/// Envelope for every frame on the duplex channel.
///
/// Inbound decoding tolerates numeric or missing ids and a missing or
/// numeric (epoch millis) timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Message {
    pub fn new(kind: MessageKind, id: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            kind,
            id: id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn command(command: &Command) -> Self {
        Self::new(
            MessageKind::Command,
            command.id.clone(),
            serde_json::to_value(command).ok(),
        )
    }

    pub fn init(client_type: Option<&str>) -> Self {
        let body = InitBody {
            client_type: client_type.map(str::to_string),
        };
        Self::new(MessageKind::Init, generate_id(), serde_json::to_value(body).ok())
    }

    pub fn ping() -> Self {
        Self::new(MessageKind::Ping, generate_id(), None)
    }

    pub fn pong(id: impl Into<String>) -> Self {
        Self::new(MessageKind::Pong, id, None)
    }

    /// Reply to a `command` envelope. `id` is the envelope's id, which may
    /// differ from the command id carried in the outcome.
    pub fn response(id: impl Into<String>, outcome: &Outcome) -> Self {
        Self::new(
            MessageKind::Response,
            id,
            serde_json::to_value(outcome).ok(),
        )
    }

    pub fn init_ack(id: impl Into<String>, ack: &InitAck) -> Self {
        Self::new(MessageKind::Init, id, serde_json::to_value(ack).ok())
    }

    pub fn error(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        let body = ErrorBody {
            code,
            message: message.into(),
        };
        Self::new(MessageKind::Error, id, serde_json::to_value(body).ok())
    }

    /// Decode the payload into a typed body. An absent payload decodes as `null`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone().unwrap_or(Value::Null))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let parsed = match Value::deserialize(deserializer)? {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(Utc::now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_type_is_preserved() {
        let msg: Message = serde_json::from_value(json!({"type": "subscribe", "id": "m1"})).unwrap();
        assert_eq!(msg.kind, MessageKind::Unknown("subscribe".into()));
        assert_eq!(msg.id, "m1");
        assert!(msg.payload.is_none());
    }

    #[test]
    fn inbound_envelope_is_lenient() {
        let before = Utc::now();
        let msg: Message = serde_json::from_value(json!({"type": "ping", "id": 17})).unwrap();
        assert_eq!(msg.kind, MessageKind::Ping);
        assert_eq!(msg.id, "17");
        assert!(msg.timestamp >= before);

        let msg: Message =
            serde_json::from_value(json!({"type": "ping", "timestamp": 1_700_000_000_000i64})).unwrap();
        assert_eq!(msg.id, "");
        assert_eq!(msg.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn missing_type_fails_to_decode() {
        assert!(serde_json::from_value::<Message>(json!({"id": "x"})).is_err());
    }

    #[test]
    fn error_message_shape() {
        let msg = Message::error("c-7", ErrorCode::DuplicateCommandId, "already in flight");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["id"], "c-7");
        assert_eq!(value["payload"]["code"], "duplicate_command_id");
        assert!(value["timestamp"].is_string());
        let body: ErrorBody = msg.payload_as().unwrap();
        assert_eq!(body.code, ErrorCode::DuplicateCommandId);
    }

    #[test]
    fn init_payload_is_optional() {
        let msg: Message = serde_json::from_value(json!({"type": "init", "id": "i"})).unwrap();
        let body: Option<InitBody> = msg.payload_as().unwrap();
        assert_eq!(body, None);
        let msg = Message::init(Some("agent"));
        let body: InitBody = msg.payload_as().unwrap();
        assert_eq!(body.client_type.as_deref(), Some("agent"));
    }
}
