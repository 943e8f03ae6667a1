use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::AppConfig;
use crate::engine::{Engine, DETACHED_ATTEMPT_FACTOR};
use crate::locks::TargetLocks;
use crate::nl::{RemoteTranslator, RuleTranslator, Translator};
use crate::session::SessionRegistry;
use crate::strategy::StrategySet;
use crate::surface::{DetachedSurface, DevToolsSurface, MockSurface, SharedSurface};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Engine,
    pub sessions: SessionRegistry,
    pub translator: Arc<dyn Translator>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, engine: Engine, translator: Arc<dyn Translator>) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            sessions: SessionRegistry::new(),
            translator,
            started_at: Instant::now(),
        }
    }

    /// Wire the standard strategies, the configured surface and translator.
    pub fn from_config(config: AppConfig) -> Self {
        let engine = Engine::new(
            StrategySet::standard(),
            build_surface(&config),
            TargetLocks::new(),
            config.engine_config(),
        );
        let translator = build_translator(&config);
        Self::new(config, engine, translator)
    }
}

pub fn build_surface(config: &AppConfig) -> SharedSurface {
    if config.simulate {
        info!("using simulated in-memory scene");
        return Arc::new(MockSurface::simulated());
    }
    match &config.devtools_ws_url {
        Some(url) => {
            info!(url = %url, "using devtools surface");
            let timeout = config.strategy_timeout;
            Arc::new(
                DevToolsSurface::new(url.clone())
                    .with_timeouts(timeout, timeout * DETACHED_ATTEMPT_FACTOR),
            )
        }
        None => {
            info!("DEVTOOLS_WS_URL not set; commands will run detached");
            Arc::new(DetachedSurface)
        }
    }
}

pub fn build_translator(config: &AppConfig) -> Arc<dyn Translator> {
    match &config.nl_service_url {
        Some(url) => Arc::new(RemoteTranslator::new(
            url.clone(),
            config.nl_service_key.clone(),
        )),
        None => Arc::new(RuleTranslator),
    }
}
