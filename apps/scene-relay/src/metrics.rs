use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static COMMANDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("scene_commands_total", "commands executed by action and verdict"),
        &["action", "verdict"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static STRATEGY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "scene_strategy_attempts_total",
            "strategy invocations by action, strategy and result",
        ),
        &["action", "strategy", "result"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static COMMAND_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        HistogramOpts::new("scene_command_latency_ms", "end-to-end command latency (ms)")
            .buckets(vec![
                5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 15000.0,
            ]),
        &["action"],
    )
    .unwrap();
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub static ACTIVE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::with_opts(Opts::new(
        "scene_active_sessions",
        "duplex sessions currently connected",
    ))
    .unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub static TARGET_LOCKS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::with_opts(Opts::new(
        "scene_target_locks",
        "targets that have a lock entry",
    ))
    .unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub static PROTOCOL_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "scene_protocol_errors_total",
            "error messages sent to duplex clients by code",
        ),
        &["code"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn gather() -> Vec<u8> {
    // Touch every family so an idle process still exports them.
    Lazy::force(&COMMANDS_TOTAL);
    Lazy::force(&STRATEGY_ATTEMPTS);
    Lazy::force(&COMMAND_LATENCY_MS);
    Lazy::force(&ACTIVE_SESSIONS);
    Lazy::force(&TARGET_LOCKS);
    Lazy::force(&PROTOCOL_ERRORS);

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "metrics encode error");
    }
    buffer
}
