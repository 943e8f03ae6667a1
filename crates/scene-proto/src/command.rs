use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::generate_id;

/// Operation requested against the remote scene.
///
/// Unknown names are never rejected: they become [`Action::Custom`] with the
/// literal preserved so page-side handlers can be added without a protocol
/// release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Rotate,
    Zoom,
    Focus,
    Reset,
    Highlight,
    Custom(String),
}

/// Tag used to key strategy lookup; every custom name shares one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Rotate,
    Zoom,
    Focus,
    Reset,
    Highlight,
    Custom,
}

impl Action {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rotate" => Action::Rotate,
            "zoom" => Action::Zoom,
            "focus" => Action::Focus,
            "reset" => Action::Reset,
            "highlight" => Action::Highlight,
            _ => Action::Custom(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::Rotate => "rotate",
            Action::Zoom => "zoom",
            Action::Focus => "focus",
            Action::Reset => "reset",
            Action::Highlight => "highlight",
            Action::Custom(name) => name,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Rotate => ActionKind::Rotate,
            Action::Zoom => ActionKind::Zoom,
            Action::Focus => ActionKind::Focus,
            Action::Reset => ActionKind::Reset,
            Action::Highlight => ActionKind::Highlight,
            Action::Custom(_) => ActionKind::Custom,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Action::Custom(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Action::parse(&raw))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandDecodeError {
    #[error("command must be a JSON object")]
    NotAnObject,
    #[error("command is missing an action")]
    MissingAction,
}

/// A single request to operate on the scene.
///
/// Decoding is lenient: the id is generated when absent, non-string ids and
/// targets are stringified, and a non-object parameter bag is treated as
/// empty. The older `operation`/`params` field names are accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct Command {
    pub id: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub parameters: Map<String, Value>,
}

impl Command {
    pub fn new(action: Action) -> Self {
        Self {
            id: generate_id(),
            action,
            target: None,
            parameters: Map::new(),
        }
    }

    pub fn rotate(direction: &str, angle: f64) -> Self {
        Self::new(Action::Rotate)
            .with_param("direction", Value::from(direction))
            .with_param("angle", Value::from(angle))
    }

    pub fn zoom(scale: f64) -> Self {
        Self::new(Action::Zoom).with_param("scale", Value::from(scale))
    }

    pub fn focus(target: &str) -> Self {
        Self::new(Action::Focus).with_param("target", Value::from(target))
    }

    pub fn reset() -> Self {
        Self::new(Action::Reset)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Decode from an arbitrary JSON value, using `fallback_id` when the
    /// payload carries no id of its own.
    pub fn from_value_with_id(value: Value, fallback_id: Option<&str>) -> Result<Self, CommandDecodeError> {
        let Value::Object(mut obj) = value else {
            return Err(CommandDecodeError::NotAnObject);
        };

        let action = obj
            .remove("action")
            .or_else(|| obj.remove("operation"))
            .and_then(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            })
            .map(|s| Action::parse(&s))
            .ok_or(CommandDecodeError::MissingAction)?;

        let id = obj
            .remove("id")
            .and_then(scalar_to_string)
            .or_else(|| fallback_id.filter(|s| !s.is_empty()).map(str::to_string))
            .unwrap_or_else(generate_id);

        let target = obj.remove("target").and_then(scalar_to_string);

        let parameters = match obj.remove("parameters").or_else(|| obj.remove("params")) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        Ok(Self {
            id,
            action,
            target,
            parameters,
        })
    }
}

impl TryFrom<Value> for Command {
    type Error = CommandDecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Command::from_value_with_id(value, None)
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
