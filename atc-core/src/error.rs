use thiserror::Error;

/// All errors produced by atc-core.
#[derive(Debug, Error)]
pub enum AtcError {
    #[error("decoder process error: {0}")]
    Decoder(String),

    #[error("decoder executable not found: {0}")]
    DecoderNotFound(String),

    #[error("transcription model error: {0}")]
    Transcription(String),

    #[error("transcription pool is already running")]
    PoolAlreadyRunning,

    #[error("transcription pool is not running")]
    PoolNotRunning,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP request timed out")]
    Timeout,

    #[error("OAuth token request failed: {0}")]
    OAuth(String),

    #[error("failed to parse correlator response: {0}")]
    CorrelatorParse(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("monitor is not running")]
    NotRunning,

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AtcError>;
