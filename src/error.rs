use thiserror::Error as ThisError;

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
#[derive(Debug, ThisError)]
pub enum Error {
    /// Transport or decode failure talking to the vehicle bridge. The String contains the reason.
    ///
    /// Never retried by the [link](crate::subsystems::link), the caller decides.
    #[error("vehicle link error: {0}")]
    LinkError(String),
    /// Telemetry could not be fetched during an active navigation pass. The pass is aborted.
    #[error("navigation error: {0}")]
    NavigationError(String),
    /// The perception callback failed or returned a malformed movement vector.
    #[error("perception error: {0}")]
    PerceptionError(String),
    /// The frame source is unavailable.
    #[error("capture error: {0}")]
    CaptureError(String),
    /// The telemetry recorder or a mission file could not be written or read.
    #[error("recorder error: {0}")]
    RecorderError(String),
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),
    /// An argument is out of its valid range. The String contains the reason.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An internal channel was closed.
    #[error("disconnected")]
    Disconnected,
    /// Error with a background task.
    #[error("system error: {0}")]
    SystemError(String),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Self::LinkError(error.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::LinkError(format!("malformed telemetry: {}", error))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::SystemError(format!("{}", error))
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Self::ConfigError(error.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(error: image::ImageError) -> Self {
        Self::CaptureError(error.to_string())
    }
}

impl From<flume::RecvError> for Error {
    fn from(_: flume::RecvError) -> Self {
        self::Error::Disconnected
    }
}
