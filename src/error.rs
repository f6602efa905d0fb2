use thiserror::Error;

/// Rejections raised before any request leaves the process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    /// A submission from the same form is still in flight.
    #[error("A request is already in progress.")]
    Busy,

    #[error("Could not encode request: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        DispatchError::Encode(e.to_string())
    }
}

impl DispatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        DispatchError::Validation(message.into())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("{0}")]
    Validation(String),

    #[error("No client with id {0}")]
    UnknownClient(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OperatorError {
    #[error("{0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// Failures outside the HTTP exchange itself.
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] toml::ser::Error),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Failed to write download: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize download: {0}")]
    Serialization(#[from] serde_json::Error),
}
