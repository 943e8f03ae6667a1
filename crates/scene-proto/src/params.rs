//! Per-action parameter decoding.
//!
//! Everything that reaches a strategy has been through [`ActionParams::decode`].
//! Malformed numbers and enum values fall back to their defaults instead of
//! failing the command.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::command::{Action, Command};

pub const DEFAULT_ANGLE: f64 = 45.0;
pub const DEFAULT_SCALE: f64 = 1.5;
pub const DEFAULT_FOCUS_TARGET: &str = "center";
pub const DEFAULT_HIGHLIGHT_COLOR: &str = "#FF0000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RotateParams {
    pub direction: Direction,
    /// Degrees, always within `(0, 360]`.
    pub angle: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoomParams {
    /// Always finite and `> 0`.
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FocusParams {
    pub target: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightParams {
    pub component_id: String,
    pub color: String,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionParams {
    Rotate(RotateParams),
    Zoom(ZoomParams),
    Focus(FocusParams),
    Reset,
    Highlight(HighlightParams),
    Custom {
        name: String,
        parameters: Map<String, Value>,
    },
}

impl ActionParams {
    pub fn decode(command: &Command) -> Self {
        let params = &command.parameters;
        match &command.action {
            Action::Rotate => {
                let direction = params
                    .get("direction")
                    .and_then(Value::as_str)
                    .and_then(Direction::parse)
                    .unwrap_or(Direction::Left);
                let angle = params
                    .get("angle")
                    .and_then(coerce_f64)
                    .filter(|a| *a > 0.0 && *a <= 360.0)
                    .unwrap_or(DEFAULT_ANGLE);
                ActionParams::Rotate(RotateParams { direction, angle })
            }
            Action::Zoom => {
                let scale = params
                    .get("scale")
                    .and_then(|v| match v {
                        Value::Object(inner) => inner.get("scale").and_then(coerce_f64),
                        other => coerce_f64(other),
                    })
                    .filter(|s| *s > 0.0)
                    .unwrap_or(DEFAULT_SCALE);
                ActionParams::Zoom(ZoomParams { scale })
            }
            Action::Focus => {
                let target = non_empty_str(params.get("target"))
                    .or_else(|| command.target.clone())
                    .unwrap_or_else(|| DEFAULT_FOCUS_TARGET.to_string());
                ActionParams::Focus(FocusParams { target })
            }
            Action::Reset => ActionParams::Reset,
            Action::Highlight => {
                let component_id = non_empty_str(params.get("componentId"))
                    .or_else(|| non_empty_str(params.get("component_id")))
                    .or_else(|| command.target.clone())
                    .unwrap_or_else(|| DEFAULT_FOCUS_TARGET.to_string());
                let color = non_empty_str(params.get("color"))
                    .unwrap_or_else(|| DEFAULT_HIGHLIGHT_COLOR.to_string());
                let duration_secs = params
                    .get("durationSecs")
                    .or_else(|| params.get("duration"))
                    .and_then(coerce_f64)
                    .filter(|d| *d > 0.0);
                ActionParams::Highlight(HighlightParams {
                    component_id,
                    color,
                    duration_secs,
                })
            }
            Action::Custom(name) => ActionParams::Custom {
                name: name.clone(),
                parameters: params.clone(),
            },
        }
    }

    /// The decoded parameters as they are echoed back in an outcome and
    /// handed to page scripts.
    pub fn to_map(&self) -> Map<String, Value> {
        let value = match self {
            ActionParams::Rotate(p) => json!({
                "direction": p.direction.as_str(),
                "angle": number_value(p.angle),
            }),
            ActionParams::Zoom(p) => json!({ "scale": number_value(p.scale) }),
            ActionParams::Focus(p) => json!({ "target": p.target }),
            ActionParams::Reset => json!({}),
            ActionParams::Highlight(p) => {
                let mut v = json!({
                    "componentId": p.component_id,
                    "color": p.color,
                });
                if let Some(d) = p.duration_secs {
                    v["durationSecs"] = number_value(d);
                }
                v
            }
            ActionParams::Custom { parameters, .. } => Value::Object(parameters.clone()),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// A command after parameter decoding; this is what strategies see.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub id: String,
    pub action: Action,
    pub target: Option<String>,
    pub params: ActionParams,
}

impl Invocation {
    pub fn from_command(command: &Command) -> Self {
        Self {
            id: command.id.clone(),
            action: command.action.clone(),
            target: command.target.clone(),
            params: ActionParams::decode(command),
        }
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Integral values are emitted as JSON integers so `45` echoes back as `45`.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> ActionParams {
        ActionParams::decode(&Command::try_from(value).unwrap())
    }

    #[test]
    fn rotate_defaults_and_coercion() {
        let p = decode(json!({"action": "rotate"}));
        assert_eq!(
            p,
            ActionParams::Rotate(RotateParams {
                direction: Direction::Left,
                angle: 45.0
            })
        );

        let p = decode(json!({"action": "rotate", "parameters": {"direction": "RIGHT", "angle": "90"}}));
        assert_eq!(
            p,
            ActionParams::Rotate(RotateParams {
                direction: Direction::Right,
                angle: 90.0
            })
        );

        for bad in [json!(0), json!(-10), json!(361), json!("wide"), json!(null)] {
            let p = decode(json!({"action": "rotate", "parameters": {"direction": "sideways", "angle": bad}}));
            assert_eq!(
                p,
                ActionParams::Rotate(RotateParams {
                    direction: Direction::Left,
                    angle: DEFAULT_ANGLE
                })
            );
        }

        let p = decode(json!({"action": "rotate", "parameters": {"angle": 360}}));
        assert!(matches!(p, ActionParams::Rotate(RotateParams { angle, .. }) if angle == 360.0));
    }

    #[test]
    fn zoom_rejects_non_positive_scale() {
        for bad in [json!(0), json!(-2.5), json!("big"), json!([1])] {
            let p = decode(json!({"action": "zoom", "parameters": {"scale": bad}}));
            assert_eq!(p, ActionParams::Zoom(ZoomParams { scale: DEFAULT_SCALE }));
        }
        let p = decode(json!({"action": "zoom", "parameters": {"scale": {"scale": 2}}}));
        assert_eq!(p, ActionParams::Zoom(ZoomParams { scale: 2.0 }));
    }

    #[test]
    fn focus_prefers_parameter_then_command_target() {
        let p = decode(json!({"action": "focus", "target": "lobby", "parameters": {"target": "area3"}}));
        assert_eq!(p, ActionParams::Focus(FocusParams { target: "area3".into() }));
        let p = decode(json!({"action": "focus", "target": "lobby"}));
        assert_eq!(p, ActionParams::Focus(FocusParams { target: "lobby".into() }));
        let p = decode(json!({"action": "focus", "parameters": {"target": 12}}));
        assert_eq!(p, ActionParams::Focus(FocusParams { target: "center".into() }));
    }

    #[test]
    fn echoed_parameters_keep_integers_integral() {
        let p = decode(json!({"action": "rotate", "parameters": {"direction": "left", "angle": 45}}));
        assert_eq!(Value::Object(p.to_map()), json!({"direction": "left", "angle": 45}));
        let p = decode(json!({"action": "zoom", "parameters": {"scale": 1.5}}));
        assert_eq!(Value::Object(p.to_map()), json!({"scale": 1.5}));
    }

    #[test]
    fn highlight_falls_back_to_target() {
        let p = decode(json!({"action": "highlight", "target": "pump_2", "parameters": {"duration": -1}}));
        assert_eq!(
            p,
            ActionParams::Highlight(HighlightParams {
                component_id: "pump_2".into(),
                color: DEFAULT_HIGHLIGHT_COLOR.into(),
                duration_secs: None,
            })
        );
    }

    #[test]
    fn custom_parameters_pass_through() {
        let p = decode(json!({"action": "explode", "parameters": {"force": "max"}}));
        assert_eq!(Value::Object(p.to_map()), json!({"force": "max"}));
    }
}
