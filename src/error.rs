//! Error types for service-discovery.

use crate::transport::PeerId;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The actor task broke the start handshake.
    #[error("actor protocol error: {0}")]
    ActorProtocol(String),

    /// The actor task returned an error or panicked.
    #[error("actor task failed: {0}")]
    TaskFailed(#[source] anyhow::Error),

    /// The other end of a pipe is gone, or the owning actor has terminated.
    #[error("channel closed")]
    ChannelClosed,

    /// A non-blocking send found the pipe at its high-water mark.
    #[error("channel full")]
    ChannelFull,

    /// A membership event referenced a peer that is not in the peer table.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// A payload did not decode as a discovery message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// An endpoint string carried no usable port.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A setting is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Membership transport error.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Create an actor protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::ActorProtocol(msg.into())
    }

    /// Create a malformed message error.
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Create a transport error.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// The original task error, if this is a [`Error::TaskFailed`].
    pub fn task_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::TaskFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Self::MalformedMessage(err.to_string())
    }
}
