use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("A remediation session is already in flight")]
    SessionInFlight,

    #[error("Remediation is disabled by configuration")]
    RemediationDisabled,

    #[error("No model is bound to the orchestrator")]
    NoModel,

    #[error("Issue batch carries no migration profile")]
    MissingProfile,

    #[error("Interaction already registered: {0}")]
    InteractionExists(String),

    #[error("Invalid response for interaction {0}: expected a choice or a yes/no answer")]
    InvalidResponse(String),

    #[error("Interaction cancelled: {0}")]
    InteractionCancelled(String),

    #[error("Model binary not found in PATH")]
    ModelBinaryNotFound,

    #[error("Model error: {0}")]
    Model(String),

    #[error("Handler {name} failed: {message}")]
    Handler { name: String, message: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
