//! Command execution engine for a browser-hosted 3D scene.
//!
//! Commands arrive over a duplex WebSocket, a one-shot HTTP call or as free
//! text, are serialized per target, and are executed by trying an ordered
//! list of page strategies until one succeeds.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod nl;
pub mod routes;
pub mod session;
pub mod state;
pub mod strategy;
pub mod surface;
pub mod telemetry;
pub mod websocket;

pub use config::AppConfig;
pub use engine::{Engine, EngineConfig, PendingExecution, VerdictPolicy};
pub use routes::build_router;
pub use state::AppState;
