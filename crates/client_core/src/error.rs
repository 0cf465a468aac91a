use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceSessionError {
    #[error("failed to request voice token: {0}")]
    TokenRequest(String),
    #[error("unexpected server response for voice token request")]
    UnexpectedTokenResponse,
    #[error("voice token response channel mismatch")]
    TokenChannelMismatch,
    #[error("failed to connect livekit room: {0}")]
    Connect(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file '{}' does not exist", path.display())]
    Missing { path: PathBuf },
    #[error("failed to read settings file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}
