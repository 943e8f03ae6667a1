use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::Action;

/// Final verdict for one command.
///
/// `strategy_used` is `None` when no strategy definitely succeeded; it is
/// always serialized so callers can tell a degraded success from a real one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub command_id: String,
    pub success: bool,
    pub action: Action,
    pub parameters: Map<String, Value>,
    pub result: Value,
    pub strategy_used: Option<String>,
    pub elapsed_ms: u64,
    pub attempts: u32,
}

impl Outcome {
    pub fn is_degraded(&self) -> bool {
        self.result
            .get("degraded")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_engine_fault(&self) -> bool {
        !self.success && self.result.get("error").and_then(Value::as_str) == Some("engine_fault")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strategy_used_serializes_as_null() {
        let outcome = Outcome {
            command_id: "c1".into(),
            success: true,
            action: Action::Zoom,
            parameters: Map::new(),
            result: json!({"degraded": true, "failures": []}),
            strategy_used: None,
            elapsed_ms: 3,
            attempts: 3,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["strategyUsed"], Value::Null);
        assert_eq!(value["commandId"], "c1");
        assert_eq!(value["elapsedMs"], 3);
        assert!(outcome.is_degraded());
        assert!(!outcome.is_engine_fault());
    }
}
