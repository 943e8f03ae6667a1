use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::engine::{EngineConfig, VerdictPolicy, DEFAULT_STRATEGY_TIMEOUT};

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LOG_FILTER: &str = "info,scene_relay=debug";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    /// Page the browser is expected to have open.
    pub frontend_url: String,
    pub browser_type: String,
    pub headless: bool,
    /// DevTools page socket; without it commands run against a detached surface.
    pub devtools_ws_url: Option<String>,
    /// Serve against the in-memory scene instead of a browser.
    pub simulate: bool,
    pub nl_service_url: Option<String>,
    pub nl_service_key: Option<String>,
    pub strategy_timeout: Duration,
    pub session_idle_timeout: Duration,
    pub session_require_init: bool,
    pub strict_verdicts: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let bind_addr = env::var("SCENE_RELAY_ADDR")
            .ok()
            .and_then(|addr| addr.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], port)));
        let log_filter = env::var("RUST_LOG")
            .or_else(|_| env::var("LOG_LEVEL").map(|level| level.to_ascii_lowercase()))
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
        let strategy_timeout = env::var("STRATEGY_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|ms: &u64| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_STRATEGY_TIMEOUT);
        let session_idle_timeout = env::var("SESSION_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT);

        Self {
            bind_addr,
            log_filter,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            browser_type: env::var("BROWSER_TYPE").unwrap_or_else(|_| "chromium".to_string()),
            headless: env_flag("HEADLESS").unwrap_or(true),
            devtools_ws_url: non_empty_var("DEVTOOLS_WS_URL"),
            simulate: env_flag("SCENE_SIMULATE").unwrap_or(false),
            nl_service_url: non_empty_var("NL_SERVICE_URL"),
            nl_service_key: non_empty_var("NL_SERVICE_KEY"),
            strategy_timeout,
            session_idle_timeout,
            session_require_init: env_flag("SESSION_REQUIRE_INIT").unwrap_or(false),
            strict_verdicts: env_flag("STRICT_VERDICTS").unwrap_or(false),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            strategy_timeout: self.strategy_timeout,
            policy: if self.strict_verdicts {
                VerdictPolicy::Strict
            } else {
                VerdictPolicy::MaskExhaustion
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            browser_type: "chromium".to_string(),
            headless: true,
            devtools_ws_url: None,
            simulate: false,
            nl_service_url: None,
            nl_service_key: None,
            strategy_timeout: DEFAULT_STRATEGY_TIMEOUT,
            session_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            session_require_init: false,
            strict_verdicts: false,
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| {
        let value = value.trim();
        value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
    })
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
