use thiserror::Error;

/// Failures of a single user action. None of them is fatal to the app;
/// the user recovers by repeating the action.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Server returned {status}: {body}")]
    Transport { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Microphone unavailable: {0}")]
    Permission(String),

    #[error("Unexpected server response: {0}")]
    MalformedResponse(String),

    #[error("Query is empty")]
    EmptyQuery,

    #[error("An upload is already in progress")]
    UploadInProgress,

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
