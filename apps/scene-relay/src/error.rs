use thiserror::Error;

/// Failure talking to the page that hosts the scene.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("remote surface unavailable: {0}")]
    Unavailable(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("script raised: {0}")]
    Script(String),
    #[error("unexpected reply: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no command could be inferred from the text")]
    NoMatch,
    #[error("translator service failed: {0}")]
    Remote(String),
}

impl From<reqwest::Error> for TranslateError {
    fn from(err: reqwest::Error) -> Self {
        TranslateError::Remote(err.to_string())
    }
}
