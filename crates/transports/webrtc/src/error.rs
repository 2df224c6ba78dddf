//! Error types for the webrtc-rs adapter

/// Result type alias using the adapter Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while driving webrtc-rs
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP creation or application failed
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error concerns a single track rather than the connection
    pub fn is_track_error(&self) -> bool {
        matches!(self, Error::MediaTrackError(_))
    }
}

impl From<Error> for sfu_publish_core::Error {
    fn from(err: Error) -> Self {
        use sfu_publish_core::Error as CoreError;

        match err {
            Error::InvalidConfig(msg) => CoreError::InvalidConfig(msg),
            Error::MediaTrackError(msg) => CoreError::MediaSink(msg),
            Error::Other(e) => CoreError::Other(e),
            other => CoreError::PeerConnection(other.to_string()),
        }
    }
}
