use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::RemoteSurface;
use crate::error::SurfaceError;

/// What the mock page does when a given strategy's script runs.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return this value as the script result.
    Reply(Value),
    /// Return `{success: false, error}`.
    Reject(String),
    /// Fail at the transport level.
    Fault(String),
    /// Never answer.
    Hang,
    /// Panic inside the surface call.
    Panic,
    Delay(Duration, Box<MockBehavior>),
    /// Apply the command to the in-memory scene.
    Simulate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub strategy: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq)]
struct SceneState {
    azimuth: f64,
    elevation: f64,
    distance: f64,
    focus: String,
    highlighted: BTreeSet<String>,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            azimuth: 0.0,
            elevation: 0.0,
            distance: 10.0,
            focus: "center".into(),
            highlighted: BTreeSet::new(),
        }
    }
}

impl SceneState {
    fn apply(&mut self, args: &Value) {
        let params = &args["params"];
        match args["action"].as_str().unwrap_or_default() {
            "rotate" => {
                let angle = params["angle"].as_f64().unwrap_or(0.0);
                match params["direction"].as_str() {
                    Some("right") => self.azimuth -= angle,
                    Some("up") => self.elevation += angle,
                    Some("down") => self.elevation -= angle,
                    _ => self.azimuth += angle,
                }
                self.azimuth = self.azimuth.rem_euclid(360.0);
            }
            "zoom" => {
                if let Some(scale) = params["scale"].as_f64().filter(|s| *s > 0.0) {
                    self.distance /= scale;
                }
            }
            "focus" => {
                if let Some(target) = params["target"].as_str() {
                    self.focus = target.to_string();
                }
            }
            "highlight" => {
                if let Some(id) = params["componentId"].as_str() {
                    self.highlighted.insert(id.to_string());
                }
            }
            "reset" => *self = SceneState::default(),
            _ => {}
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "azimuth": self.azimuth,
            "elevation": self.elevation,
            "distance": self.distance,
            "focus": self.focus,
            "highlighted": self.highlighted.iter().collect::<Vec<_>>(),
        })
    }
}

/// Programmable in-process page.
///
/// Behaviors are keyed by the strategy name carried in the script args;
/// strategies without an explicit behavior use the fallback.
pub struct MockSurface {
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    fallback: MockBehavior,
    calls: Mutex<Vec<MockCall>>,
    scene: Mutex<SceneState>,
}

impl MockSurface {
    /// Every strategy is rejected unless configured otherwise.
    pub fn new() -> Self {
        Self::with_fallback(MockBehavior::Reject("no handler on page".into()))
    }

    /// Every strategy succeeds against an in-memory scene.
    pub fn simulated() -> Self {
        Self::with_fallback(MockBehavior::Simulate)
    }

    pub fn with_fallback(fallback: MockBehavior) -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
            scene: Mutex::new(SceneState::default()),
        }
    }

    pub fn on(self, strategy: &str, behavior: MockBehavior) -> Self {
        self.behaviors.lock().insert(strategy.to_string(), behavior);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn strategies_called(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.strategy.clone()).collect()
    }

    pub fn scene(&self) -> Value {
        self.scene.lock().to_value()
    }
}

impl Default for MockSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSurface for MockSurface {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, _script: &str, args: Value) -> Result<Value, SurfaceError> {
        let strategy = args["strategy"].as_str().unwrap_or_default().to_string();
        let mut behavior = self
            .behaviors
            .lock()
            .get(&strategy)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        self.calls.lock().push(MockCall {
            strategy,
            args: args.clone(),
        });

        loop {
            match behavior {
                MockBehavior::Delay(wait, next) => {
                    tokio::time::sleep(wait).await;
                    behavior = *next;
                }
                MockBehavior::Reply(value) => break Ok(value),
                MockBehavior::Reject(reason) => {
                    break Ok(json!({"success": false, "error": reason}))
                }
                MockBehavior::Fault(reason) => break Err(SurfaceError::Transport(reason)),
                MockBehavior::Hang => break std::future::pending().await,
                MockBehavior::Panic => panic!("mock surface panicked"),
                MockBehavior::Simulate => {
                    let mut scene = self.scene.lock();
                    scene.apply(&args);
                    break Ok(json!({"success": true, "camera": scene.to_value()}));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_scene_tracks_camera() {
        let surface = MockSurface::simulated();
        surface
            .run("", json!({"strategy": "x", "action": "rotate", "params": {"direction": "right", "angle": 90}}))
            .await
            .unwrap();
        assert_eq!(surface.scene()["azimuth"], json!(270.0));
        surface
            .run("", json!({"strategy": "y", "action": "reset", "params": {}}))
            .await
            .unwrap();
        assert_eq!(surface.scene(), SceneState::default().to_value());
        assert_eq!(surface.strategies_called(), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn behaviors_are_keyed_by_strategy() {
        let surface = MockSurface::new().on("good", MockBehavior::Reply(json!(true)));
        assert_eq!(
            surface.run("", json!({"strategy": "good"})).await,
            Ok(json!(true))
        );
        assert_eq!(
            surface.run("", json!({"strategy": "other"})).await,
            Ok(json!({"success": false, "error": "no handler on page"}))
        );
    }
}
