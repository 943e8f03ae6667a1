//! Ordered, per-action ways of getting the page to do something.

mod script;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scene_proto::{ActionKind, ActionParams, Invocation};
use serde_json::{Map, Value};

use crate::error::SurfaceError;
use crate::surface::RemoteSurface;

pub use script::ScriptStrategy;

/// A definite answer from the page. Anything else (timeouts, transport
/// faults) is reported as `Err` by the strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyVerdict {
    Succeeded(Value),
    Rejected(String),
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(
        &self,
        invocation: &Invocation,
        surface: &dyn RemoteSurface,
    ) -> Result<StrategyVerdict, SurfaceError>;
}

pub type SharedStrategy = Arc<dyn Strategy>;

/// Strategy lists keyed by action. Order is attempt order.
#[derive(Clone, Default)]
pub struct StrategySet {
    by_kind: HashMap<ActionKind, Vec<SharedStrategy>>,
}

impl StrategySet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in scripts for every known action plus the custom
    /// pass-through.
    pub fn standard() -> Self {
        let mut set = Self::empty();
        for kind in [
            ActionKind::Rotate,
            ActionKind::Zoom,
            ActionKind::Focus,
            ActionKind::Reset,
            ActionKind::Highlight,
            ActionKind::Custom,
        ] {
            let strategies = script::standard_for(kind)
                .into_iter()
                .map(|s| Arc::new(s) as SharedStrategy)
                .collect();
            set = set.with(kind, strategies);
        }
        set
    }

    /// Replace the list for `kind`.
    pub fn with(mut self, kind: ActionKind, strategies: Vec<SharedStrategy>) -> Self {
        self.by_kind.insert(kind, strategies);
        self
    }

    pub fn for_kind(&self, kind: ActionKind) -> &[SharedStrategy] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self, kind: ActionKind) -> Vec<String> {
        self.for_kind(kind)
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }
}

/// Interpret what a page script returned.
///
/// Objects with a boolean `success` field decide by that field; the other
/// fields become the result on success, `error` the reason on rejection.
/// Anything else decides by JavaScript truthiness.
pub fn interpret_script_result(value: Value) -> StrategyVerdict {
    match value {
        Value::Object(mut map) => match map.remove("success") {
            Some(Value::Bool(false)) => {
                let reason = map
                    .get("error")
                    .or_else(|| map.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("page reported failure")
                    .to_string();
                StrategyVerdict::Rejected(reason)
            }
            _ => StrategyVerdict::Succeeded(Value::Object(map)),
        },
        Value::Null => StrategyVerdict::Rejected("script returned nothing".into()),
        Value::Bool(false) => StrategyVerdict::Rejected("script returned false".into()),
        Value::Number(n) if n.as_f64() == Some(0.0) => {
            StrategyVerdict::Rejected("script returned 0".into())
        }
        Value::String(s) if s.is_empty() => {
            StrategyVerdict::Rejected("script returned an empty string".into())
        }
        Value::Bool(true) => StrategyVerdict::Succeeded(Value::Object(Map::new())),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            StrategyVerdict::Succeeded(Value::Object(map))
        }
    }
}

/// Stamp the action-level facts onto a successful result so every strategy
/// of an action reports the same shape.
pub fn decorate_result(invocation: &Invocation, result: Value) -> Value {
    let mut map = match result {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    };
    match &invocation.params {
        ActionParams::Rotate(p) => {
            map.insert("rotated".into(), Value::Bool(true));
            map.insert("direction".into(), p.direction.as_str().into());
            map.insert("angle".into(), scene_proto::params::number_value(p.angle));
        }
        ActionParams::Zoom(p) => {
            map.insert(
                "scaleApplied".into(),
                scene_proto::params::number_value(p.scale),
            );
        }
        ActionParams::Focus(p) => {
            map.insert("focused".into(), p.target.clone().into());
        }
        ActionParams::Reset => {
            map.insert("reset".into(), Value::Bool(true));
        }
        ActionParams::Highlight(p) => {
            map.insert("highlighted".into(), p.component_id.clone().into());
        }
        ActionParams::Custom { .. } => {}
    }
    Value::Object(map)
}
