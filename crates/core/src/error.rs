//! Error types for the publishing core

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while signaling, negotiating or pacing media
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed inbound payload (undecodable description or candidate)
    #[error("Decode error: {0}")]
    Decode(String),

    /// A decoded description or candidate could not be applied
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// The remote side rejected a request
    #[error("Signaling rejected ({code}): {message}")]
    Signaling {
        /// Error code reported by the remote side
        code: i32,
        /// Human-readable reason
        message: String,
    },

    /// Local peer-connection operation failed (offer/answer creation, close)
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Reading the next media unit failed (other than clean exhaustion)
    #[error("Media source error: {0}")]
    MediaSource(String),

    /// Writing a media unit to its sink failed
    #[error("Media sink error: {0}")]
    MediaSink(String),

    /// Signaling transport failure while sending
    #[error("Transport error: {0}")]
    Transport(String),

    /// The signaling transport closed before negotiation completed
    #[error("Transport closed mid-negotiation: {0}")]
    UnexpectedClose(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// Serialization/deserialization error of outbound messages
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Errors that only cost the single message that caused them
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Decode(_))
    }

    /// Errors that end the signaling session
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_)
                | Error::Signaling { .. }
                | Error::PeerConnection(_)
                | Error::Transport(_)
                | Error::UnexpectedClose(_)
                | Error::OperationTimeout(_)
                | Error::Internal(_)
        )
    }

    /// Errors that end a single pacer but leave the session running
    pub fn is_pacer_local(&self) -> bool {
        matches!(self, Error::MediaSource(_) | Error::MediaSink(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Process exit code for a run that ended with this error
    pub fn exit_code(&self) -> i32 {
        if self.is_config_error() {
            2
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Negotiation("remote answer rejected".to_string());
        assert_eq!(err.to_string(), "Negotiation error: remote answer rejected");

        let err = Error::Signaling {
            code: 486,
            message: "Busy Here".to_string(),
        };
        assert_eq!(err.to_string(), "Signaling rejected (486): Busy Here");
    }

    #[test]
    fn test_decode_errors_are_recoverable() {
        assert!(Error::Decode("bad json".to_string()).is_recoverable());
        assert!(!Error::Decode("bad json".to_string()).is_session_fatal());
        assert!(!Error::Negotiation("x".to_string()).is_recoverable());
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(Error::Negotiation("x".to_string()).is_session_fatal());
        assert!(Error::UnexpectedClose("x".to_string()).is_session_fatal());
        assert!(!Error::MediaSink("x".to_string()).is_session_fatal());
        assert!(Error::MediaSink("x".to_string()).is_pacer_local());
        assert!(Error::MediaSource("x".to_string()).is_pacer_local());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::InvalidConfig("x".to_string()).exit_code(), 2);
        assert_eq!(Error::Negotiation("x".to_string()).exit_code(), 1);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }
}
