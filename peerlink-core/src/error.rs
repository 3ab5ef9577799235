//! Error taxonomy shared by every PeerLink component.

/// Core error type. Listener loops log these and continue; per-call and
/// per-message operations return them to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad control, presence or text payload. Dropped by listeners.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// Peer closed a stream before a full frame arrived.
    #[error("connection closed")]
    ConnectionClosed,
    #[error("already recording")]
    AlreadyRecording,
    #[error("not recording")]
    NotRecording,
    #[error("no recorded audio to send")]
    EmptyRecording,
    /// Outbound connect or send failed.
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    #[error("operation timed out")]
    Timeout,
    /// Call operation not valid for the session's current status.
    #[error("invalid call state: {0}")]
    InvalidState(String),
    /// Capture or playback device failure.
    #[error("device error: {0}")]
    Device(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the error means the remote end went away, as opposed to a local fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
