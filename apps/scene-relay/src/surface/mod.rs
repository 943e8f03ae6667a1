//! The page that renders the scene, reached only by running scripts in it.

mod devtools;
mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SurfaceError;

pub use devtools::DevToolsSurface;
pub use mock::{MockBehavior, MockCall, MockSurface};

/// Script execution boundary.
///
/// `script` is the body of an async function that receives a single `args`
/// parameter; `args` is passed through as JSON.
#[async_trait]
pub trait RemoteSurface: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, script: &str, args: Value) -> Result<Value, SurfaceError>;
}

pub type SharedSurface = Arc<dyn RemoteSurface>;

/// Used when no page is attached. Every call faults, so commands degrade
/// according to the verdict policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSurface;

#[async_trait]
impl RemoteSurface for DetachedSurface {
    fn name(&self) -> &'static str {
        "detached"
    }

    async fn run(&self, _script: &str, _args: Value) -> Result<Value, SurfaceError> {
        Err(SurfaceError::Unavailable("no page attached".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detached_surface_always_faults() {
        let surface: SharedSurface = Arc::new(DetachedSurface);
        let err = surface.run("return 1", Value::Null).await.unwrap_err();
        assert!(matches!(err, SurfaceError::Unavailable(_)));
    }
}
