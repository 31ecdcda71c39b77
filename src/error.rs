//! Error types for the sensor pipeline and its streaming session

use std::io;

use thiserror::Error;

use crate::session::SessionState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The spectrum source refused to tune
    #[error("Spectrum source rejected tune request to {0} Hz")]
    TuneRejected(f64),

    /// The control-plane request itself failed
    #[error("Streaming port negotiation with {host} failed: {reason}")]
    Negotiation { host: String, reason: String },

    /// The collector answered, but not with a usable port
    #[error("Malformed streaming port response: {0}")]
    MalformedResponse(String),

    #[error("Failed to connect to collector at {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid session transition from {from:?}: cannot {attempted}")]
    InvalidTransition {
        from: SessionState,
        attempted: &'static str,
    },

    /// A measurement frame disagrees with the channel count declared in the header
    #[error("Frame length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The transport writer exited, usually because the socket failed
    #[error("Collector connection lost")]
    CollectorGone,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
