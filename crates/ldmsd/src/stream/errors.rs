use ldmsd_wire::WireError;
use thiserror::Error;

use crate::status;
use crate::transport::TransportError;

/// Failures of the stream bus and stream messages.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The sink and context already subscribe to the stream.
    #[error("already subscribed to stream '{stream}'")]
    AlreadySubscribed {
        /// Stream name.
        stream: String,
    },
    /// A publication could not be encoded or decoded.
    #[error("malformed stream message: {0}")]
    Wire(#[from] WireError),
    /// Sending a publication to a peer failed.
    #[error("failed to publish to peer: {0}")]
    Transport(#[from] TransportError),
}

impl StreamError {
    /// Status reported when the failure reaches a peer.
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::AlreadySubscribed { .. } => status::EEXIST,
            Self::Wire(_) => status::EINVAL,
            Self::Transport(error) => error.status(),
        }
    }
}
