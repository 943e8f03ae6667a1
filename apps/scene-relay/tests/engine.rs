use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scene_proto::{Action, ActionKind, Command, Invocation};
use scene_relay::engine::{Engine, EngineConfig, VerdictPolicy};
use scene_relay::error::SurfaceError;
use scene_relay::locks::TargetLocks;
use scene_relay::strategy::{SharedStrategy, Strategy, StrategySet, StrategyVerdict};
use scene_relay::surface::{MockBehavior, MockSurface, RemoteSurface};
use serde_json::{json, Value};

fn engine(surface: Arc<MockSurface>, policy: VerdictPolicy) -> Engine {
    Engine::new(
        StrategySet::standard(),
        surface,
        TargetLocks::new(),
        EngineConfig {
            strategy_timeout: Duration::from_secs(5),
            policy,
        },
    )
}

#[tokio::test]
async fn escalates_until_a_strategy_succeeds() {
    let surface = Arc::new(
        MockSurface::new()
            .on("page.rotateModel", MockBehavior::Reject("rotateModel missing".into()))
            .on("controls.orbit", MockBehavior::Reply(json!({"success": true}))),
    );
    let engine = engine(surface.clone(), VerdictPolicy::MaskExhaustion);

    let outcome = engine
        .execute(Command::rotate("left", 45.0).with_id("r1"))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.command_id, "r1");
    assert_eq!(outcome.strategy_used.as_deref(), Some("controls.orbit"));
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.result["rotated"], json!(true));
    assert_eq!(
        Value::Object(outcome.parameters.clone()),
        json!({"direction": "left", "angle": 45})
    );
    assert_eq!(
        surface.strategies_called(),
        vec!["page.rotateModel", "controls.orbit"]
    );
}

#[tokio::test]
async fn exhaustion_is_masked_by_default() {
    let surface = Arc::new(MockSurface::new());
    let engine = engine(surface.clone(), VerdictPolicy::MaskExhaustion);

    let outcome = engine.execute(Command::zoom(2.0)).await;

    assert!(outcome.success);
    assert_eq!(outcome.strategy_used, None);
    assert!(outcome.is_degraded());
    assert_eq!(outcome.attempts, 3);
    let failures = outcome.result["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 3);
    assert_eq!(failures[0]["strategy"], "page.zoomModel");
    assert_eq!(failures[0]["reason"], "rejected");
}

#[tokio::test]
async fn strict_policy_reports_exhaustion() {
    let surface = Arc::new(MockSurface::with_fallback(MockBehavior::Fault(
        "page crashed".into(),
    )));
    let engine = engine(surface, VerdictPolicy::Strict);

    let outcome = engine.execute(Command::focus("area3")).await;

    assert!(!outcome.success);
    assert_eq!(outcome.strategy_used, None);
    assert_eq!(outcome.result["error"], "strategies_exhausted");
    assert_eq!(outcome.result["failures"][2]["reason"], "fault");
    assert!(!outcome.is_engine_fault());
}

#[tokio::test(start_paused = true)]
async fn hung_strategies_time_out_and_escalate() {
    let surface = Arc::new(
        MockSurface::new()
            .on("page.zoomModel", MockBehavior::Hang)
            .on("controls.dolly", MockBehavior::Reply(json!(true))),
    );
    let engine = engine(surface, VerdictPolicy::MaskExhaustion);

    let outcome = engine.execute(Command::new(Action::Zoom)).await;

    assert!(outcome.success);
    assert_eq!(outcome.strategy_used.as_deref(), Some("controls.dolly"));
    assert!(outcome.elapsed_ms >= 5_000);
    assert!(outcome.elapsed_ms < 10_000);
    assert_eq!(outcome.result["scaleApplied"], json!(1.5));
}

#[tokio::test(start_paused = true)]
async fn execution_is_bounded_by_strategies_times_timeout() {
    let surface = Arc::new(MockSurface::with_fallback(MockBehavior::Hang));
    let engine = engine(surface, VerdictPolicy::MaskExhaustion);

    let outcome = engine.execute(Command::reset().with_target("model")).await;

    assert!(outcome.success);
    assert!(outcome.is_degraded());
    assert_eq!(outcome.attempts, 3);
    assert!(outcome.elapsed_ms >= 15_000);
    assert!(outcome.elapsed_ms < 16_000);
    assert!(outcome.result["failures"]
        .as_array()
        .unwrap()
        .iter()
        .all(|f| f["reason"] == "timeout"));
}

#[tokio::test]
async fn panicking_strategy_is_an_engine_fault_even_when_masking() {
    let surface = Arc::new(MockSurface::new().on("page.resetModel", MockBehavior::Panic));
    let engine = engine(surface.clone(), VerdictPolicy::MaskExhaustion);

    let outcome = engine.execute(Command::reset()).await;

    assert!(!outcome.success);
    assert!(outcome.is_engine_fault());
    assert_eq!(outcome.attempts, 1);
    assert_eq!(surface.strategies_called(), vec!["page.resetModel"]);
}

#[tokio::test]
async fn action_without_strategies_is_an_engine_fault() {
    let strategies = StrategySet::standard().with(ActionKind::Highlight, Vec::new());
    let engine = Engine::new(
        strategies,
        Arc::new(MockSurface::simulated()),
        TargetLocks::new(),
        EngineConfig::default(),
    );

    let outcome = engine.execute(Command::new(Action::Highlight)).await;

    assert!(!outcome.success);
    assert!(outcome.is_engine_fault());
    assert_eq!(outcome.attempts, 0);
}

#[tokio::test]
async fn custom_actions_are_forwarded_and_never_raise() {
    let surface = Arc::new(MockSurface::new());
    let engine = engine(surface.clone(), VerdictPolicy::MaskExhaustion);

    let outcome = engine
        .execute(Command::new(Action::parse("explode")).with_param("force", json!(3)))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.action, Action::Custom("explode".into()));
    assert_eq!(outcome.attempts, 1);
    let call = &surface.calls()[0];
    assert_eq!(call.strategy, "page.dispatch");
    assert_eq!(call.args["action"], "explode");
    assert_eq!(call.args["params"], json!({"force": 3}));
}

#[tokio::test]
async fn reset_twice_leaves_the_same_scene() {
    let surface = Arc::new(MockSurface::simulated());
    let engine = engine(surface.clone(), VerdictPolicy::MaskExhaustion);

    engine.execute(Command::rotate("right", 90.0)).await;
    engine.execute(Command::zoom(3.0)).await;
    let first = engine.execute(Command::reset()).await;
    let scene_after_first = surface.scene();
    let second = engine.execute(Command::reset()).await;

    assert!(first.success && second.success);
    assert_eq!(first.strategy_used, second.strategy_used);
    assert_eq!(first.result, second.result);
    assert_eq!(first.parameters, second.parameters);
    assert_eq!(surface.scene(), scene_after_first);
    assert_eq!(surface.scene()["azimuth"], json!(0.0));
}

#[tokio::test]
async fn untargeted_commands_take_no_lock() {
    let surface = Arc::new(MockSurface::simulated());
    let engine = engine(surface, VerdictPolicy::MaskExhaustion);

    let outcome = engine.execute(Command::zoom(1.5)).await;

    assert!(outcome.success);
    assert_eq!(outcome.result["scaleApplied"], json!(1.5));
    assert_eq!(engine.locks().target_count(), 0);
}

#[tokio::test]
async fn same_target_outcomes_follow_submission_order() {
    let surface = Arc::new(MockSurface::with_fallback(MockBehavior::Delay(
        Duration::from_millis(20),
        Box::new(MockBehavior::Simulate),
    )));
    let engine = engine(surface, VerdictPolicy::MaskExhaustion);
    let delivered = Arc::new(Mutex::new(Vec::new()));

    let pending: Vec<_> = (0..5)
        .map(|i| engine.submit(Command::rotate("left", 10.0).with_id(format!("c{i}")).with_target("model")))
        .collect();

    // Start them in reverse; the reserved slots still decide the order.
    let mut handles = Vec::new();
    for p in pending.into_iter().rev() {
        let delivered = delivered.clone();
        handles.push(tokio::spawn(async move {
            p.run_with(|outcome| delivered.lock().unwrap().push(outcome.command_id.clone()))
                .await
        }));
    }
    for h in handles {
        assert!(h.await.unwrap().success);
    }

    assert_eq!(
        *delivered.lock().unwrap(),
        vec!["c0", "c1", "c2", "c3", "c4"]
    );
}

#[tokio::test(start_paused = true)]
async fn different_targets_do_not_wait_for_each_other() {
    let surface = Arc::new(
        MockSurface::simulated().on(
            "page.zoomModel",
            MockBehavior::Delay(Duration::from_secs(2), Box::new(MockBehavior::Simulate)),
        ),
    );
    let engine = engine(surface, VerdictPolicy::MaskExhaustion);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let slow = engine.submit(Command::zoom(2.0).with_id("slow").with_target("a"));
    let fast = engine.submit(Command::rotate("left", 5.0).with_id("fast").with_target("b"));
    for p in [slow, fast] {
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = p.run().await;
            tx.send(outcome.command_id).unwrap();
        });
    }

    assert_eq!(rx.recv().await.as_deref(), Some("fast"));
    assert_eq!(rx.recv().await.as_deref(), Some("slow"));
}

/// Never answers; counts how many of its attempts have been dropped.
struct Stuck {
    dropped: Arc<AtomicUsize>,
}

struct DropCount(Arc<AtomicUsize>);

impl Drop for DropCount {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Strategy for Stuck {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn attempt(
        &self,
        _invocation: &Invocation,
        _surface: &dyn RemoteSurface,
    ) -> Result<StrategyVerdict, SurfaceError> {
        let _count = DropCount(self.dropped.clone());
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_attempts_do_not_run_forever() {
    let dropped = Arc::new(AtomicUsize::new(0));
    let stuck: SharedStrategy = Arc::new(Stuck {
        dropped: dropped.clone(),
    });
    let strategies = StrategySet::empty().with(ActionKind::Reset, vec![stuck]);
    let engine = Engine::new(
        strategies,
        Arc::new(MockSurface::simulated()),
        TargetLocks::new(),
        EngineConfig::default(),
    );

    for _ in 0..4 {
        let outcome = engine.execute(Command::reset()).await;
        assert!(outcome.is_degraded());
    }
    // Still detached right after the per-attempt timeout.
    assert!(dropped.load(Ordering::SeqCst) < 4);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(dropped.load(Ordering::SeqCst), 4);
}
