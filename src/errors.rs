use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("Browser disconnected: {0}")]
    Disconnected(String),

    #[error("Window lost: {0}")]
    WindowLost(String),

    #[error("Frame vanished: {0}")]
    FrameVanished(String),

    #[error("Frame unreachable: {0}")]
    FrameUnreachable(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("JavaScript execution failed: {0}")]
    JavaScriptFailed(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Anyhow error: {0}")]
    AnyhowError(String),
}

pub type Result<T> = std::result::Result<T, LocatorError>;

// Convert anyhow::Error to LocatorError
impl From<anyhow::Error> for LocatorError {
    fn from(err: anyhow::Error) -> Self {
        LocatorError::AnyhowError(err.to_string())
    }
}

impl LocatorError {
    /// Conditions the engine recovers from internally and never reports.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LocatorError::FrameVanished(_) | LocatorError::WindowLost(_)
        )
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, LocatorError::Disconnected(_))
    }
}
