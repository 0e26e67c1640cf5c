//! Failures raised while dispatching a request or sending its reply.
//!
//! Problems with the request itself (bad attributes, unknown names) are not
//! errors here: handlers answer them with a reply carrying a status. These
//! variants cover the cases where no reply can be produced or delivered.

use ldmsd_wire::CorrelationKey;
use thiserror::Error;

use crate::status;
use crate::transport::TransportError;

/// Errors surfaced by handlers and the reply path.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A terminal reply was already sent for this context.
    #[error("a reply was already sent for message {key}")]
    ReplyAlreadySent {
        /// Key of the context.
        key: CorrelationKey,
    },

    /// Reply serialization failed.
    #[error("failed to serialize reply: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Sending the reply records failed.
    #[error("failed to send reply: {0}")]
    Transport(#[from] TransportError),

    /// Internal failure, such as a handler state that cannot be produced.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl DispatchError {
    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Status reported if the failure is surfaced to a peer.
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::ReplyAlreadySent { .. } => status::EINVAL,
            Self::Serialize(_) | Self::Internal { .. } => status::ENOMEM,
            Self::Transport(error) => error.status(),
        }
    }
}
