//! Escalating-fallback command execution.
//!
//! Each action has an ordered strategy list. Strategies are tried one at a
//! time with a per-attempt timeout until one definitely succeeds. What an
//! exhausted list reports is governed by [`VerdictPolicy`].

use std::sync::Arc;
use std::time::Duration;

use scene_proto::{ActionKind, Command, Invocation, Outcome};
use serde_json::{json, Value};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::SurfaceError;
use crate::locks::{LockTicket, TargetLocks};
use crate::metrics;
use crate::strategy::{StrategySet, StrategyVerdict};
use crate::surface::SharedSurface;

pub const DEFAULT_STRATEGY_TIMEOUT: Duration = Duration::from_secs(5);

/// A timed-out attempt keeps running detached for at most this many
/// strategy timeouts before it is dropped.
pub const DETACHED_ATTEMPT_FACTOR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerdictPolicy {
    /// Exhausting every strategy still reports `success: true`, flagged as
    /// degraded in the result.
    #[default]
    MaskExhaustion,
    /// Exhaustion reports `success: false`.
    Strict,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy_timeout: Duration,
    pub policy: VerdictPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy_timeout: DEFAULT_STRATEGY_TIMEOUT,
            policy: VerdictPolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    strategies: StrategySet,
    surface: SharedSurface,
    locks: TargetLocks,
    config: EngineConfig,
}

/// A command whose place in its target's queue is already fixed.
pub struct PendingExecution {
    engine: Engine,
    command: Command,
    ticket: Option<LockTicket>,
}

enum AttemptResult {
    Succeeded(Value),
    Failed { reason: &'static str, detail: String },
    Crashed(String),
}

impl Engine {
    pub fn new(
        strategies: StrategySet,
        surface: SharedSurface,
        locks: TargetLocks,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                strategies,
                surface,
                locks,
                config,
            }),
        }
    }

    pub fn locks(&self) -> &TargetLocks {
        &self.inner.locks
    }

    pub fn surface_name(&self) -> &'static str {
        self.inner.surface.name()
    }

    pub fn policy(&self) -> VerdictPolicy {
        self.inner.config.policy
    }

    /// Execute one command to completion, waiting for its target if needed.
    pub async fn execute(&self, command: Command) -> Outcome {
        self.submit(command).run().await
    }

    /// Reserve the command's lock slot now and defer execution.
    pub fn submit(&self, command: Command) -> PendingExecution {
        let ticket = command
            .target
            .as_deref()
            .map(|target| self.inner.locks.enqueue(target, &command.id));
        PendingExecution {
            engine: self.clone(),
            command,
            ticket,
        }
    }

    async fn run_strategies(&self, command: &Command) -> Outcome {
        let started = Instant::now();
        let invocation = Arc::new(Invocation::from_command(command));
        let kind = invocation.action.kind();
        let action_label = action_label(kind);
        let parameters = invocation.params.to_map();
        let strategies = self.inner.strategies.for_kind(kind);

        let mut failures: Vec<Value> = Vec::new();
        let mut attempts: u32 = 0;

        let finish = |success: bool, result: Value, strategy_used: Option<String>, attempts: u32| {
            let elapsed = started.elapsed();
            Outcome {
                command_id: command.id.clone(),
                success,
                action: command.action.clone(),
                parameters: parameters.clone(),
                result,
                strategy_used,
                elapsed_ms: elapsed.as_millis() as u64,
                attempts,
            }
        };

        if strategies.is_empty() {
            error!(command_id = %command.id, action = %command.action, "no strategies registered");
            let outcome = finish(
                false,
                json!({
                    "error": "engine_fault",
                    "message": format!("no strategies registered for {}", command.action),
                }),
                None,
                0,
            );
            record(action_label, "fault", &outcome);
            return outcome;
        }

        for strategy in strategies {
            attempts += 1;
            let name = strategy.name().to_string();
            let detach_limit = self.inner.config.strategy_timeout * DETACHED_ATTEMPT_FACTOR;
            let handle = tokio::spawn({
                let strategy = strategy.clone();
                let invocation = invocation.clone();
                let surface = self.inner.surface.clone();
                let name = name.clone();
                async move {
                    let attempt = strategy.attempt(&invocation, surface.as_ref());
                    match tokio::time::timeout(detach_limit, attempt).await {
                        Ok(result) => result,
                        Err(_) => {
                            debug!(strategy = %name, "dropping abandoned attempt");
                            Err(SurfaceError::Transport("attempt abandoned".into()))
                        }
                    }
                }
            });

            // On timeout the handle is dropped, which detaches the task; the
            // task bounds itself at `detach_limit`.
            let result = match tokio::time::timeout(self.inner.config.strategy_timeout, handle).await {
                Err(_) => AttemptResult::Failed {
                    reason: "timeout",
                    detail: format!(
                        "no answer within {} ms",
                        self.inner.config.strategy_timeout.as_millis()
                    ),
                },
                Ok(Err(join_err)) => AttemptResult::Crashed(describe_join_error(join_err)),
                Ok(Ok(Ok(StrategyVerdict::Succeeded(value)))) => AttemptResult::Succeeded(value),
                Ok(Ok(Ok(StrategyVerdict::Rejected(reason)))) => AttemptResult::Failed {
                    reason: "rejected",
                    detail: reason,
                },
                Ok(Ok(Err(err))) => AttemptResult::Failed {
                    reason: "fault",
                    detail: err.to_string(),
                },
            };

            match result {
                AttemptResult::Succeeded(value) => {
                    metrics::STRATEGY_ATTEMPTS
                        .with_label_values(&[action_label, name.as_str(), "success"])
                        .inc();
                    let outcome = finish(true, value, Some(name), attempts);
                    info!(
                        command_id = %command.id,
                        action = %command.action,
                        strategy = outcome.strategy_used.as_deref().unwrap_or_default(),
                        attempts,
                        elapsed_ms = outcome.elapsed_ms,
                        "command succeeded"
                    );
                    record(action_label, "success", &outcome);
                    return outcome;
                }
                AttemptResult::Failed { reason, detail } => {
                    metrics::STRATEGY_ATTEMPTS
                        .with_label_values(&[action_label, name.as_str(), reason])
                        .inc();
                    debug!(
                        command_id = %command.id,
                        strategy = %name,
                        reason,
                        detail = %detail,
                        "strategy did not succeed; escalating"
                    );
                    failures.push(json!({"strategy": name, "reason": reason, "detail": detail}));
                }
                AttemptResult::Crashed(detail) => {
                    metrics::STRATEGY_ATTEMPTS
                        .with_label_values(&[action_label, name.as_str(), "panic"])
                        .inc();
                    error!(command_id = %command.id, strategy = %name, detail = %detail, "strategy crashed");
                    let outcome = finish(
                        false,
                        json!({
                            "error": "engine_fault",
                            "message": format!("strategy {name} crashed: {detail}"),
                            "failures": failures,
                        }),
                        None,
                        attempts,
                    );
                    record(action_label, "fault", &outcome);
                    return outcome;
                }
            }
        }

        match self.inner.config.policy {
            VerdictPolicy::MaskExhaustion => {
                warn!(
                    command_id = %command.id,
                    action = %command.action,
                    attempts,
                    "all strategies failed; reporting degraded success"
                );
                let outcome = finish(
                    true,
                    json!({"degraded": true, "failures": failures}),
                    None,
                    attempts,
                );
                record(action_label, "degraded", &outcome);
                outcome
            }
            VerdictPolicy::Strict => {
                warn!(
                    command_id = %command.id,
                    action = %command.action,
                    attempts,
                    "all strategies failed"
                );
                let outcome = finish(
                    false,
                    json!({"error": "strategies_exhausted", "failures": failures}),
                    None,
                    attempts,
                );
                record(action_label, "failed", &outcome);
                outcome
            }
        }
    }
}

impl PendingExecution {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub async fn run(self) -> Outcome {
        self.run_with(|_| {}).await
    }

    /// Execute, handing the outcome to `deliver` while the target lock is
    /// still held so same-target results leave in submission order.
    pub async fn run_with<F>(self, deliver: F) -> Outcome
    where
        F: FnOnce(&Outcome),
    {
        let guard = match self.ticket {
            Some(ticket) => Some(ticket.acquire().await),
            None => None,
        };
        let outcome = self.engine.run_strategies(&self.command).await;
        deliver(&outcome);
        drop(guard);
        outcome
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string())
    } else {
        "attempt cancelled".to_string()
    }
}

fn record(action: &str, verdict: &str, outcome: &Outcome) {
    metrics::COMMANDS_TOTAL
        .with_label_values(&[action, verdict])
        .inc();
    metrics::COMMAND_LATENCY_MS
        .with_label_values(&[action])
        .observe(outcome.elapsed_ms as f64);
}

/// Metric label for an action; custom names share one label.
fn action_label(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Rotate => "rotate",
        ActionKind::Zoom => "zoom",
        ActionKind::Focus => "focus",
        ActionKind::Reset => "reset",
        ActionKind::Highlight => "highlight",
        ActionKind::Custom => "custom",
    }
}
