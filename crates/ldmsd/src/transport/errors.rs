//! Error types for transports and the socket listener.

use std::io;
use std::net::SocketAddr;

use ldmsd_wire::WireError;
use thiserror::Error;

use crate::status;

/// Failures sending records to a peer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer connection has gone away.
    #[error("connection {connection} is closed")]
    Closed {
        /// Connection identity.
        connection: u64,
    },
    /// Writing to the socket failed.
    #[error("failed to write record: {source}")]
    Io {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Framing the message into records failed.
    #[error(transparent)]
    Framing(#[from] WireError),
    /// The transport refused the record with an explicit status.
    #[error("transport rejected the record with status {status}")]
    Rejected {
        /// Status reported by the transport.
        status: i32,
    },
}

impl TransportError {
    /// Status reported to callers that need an errno-style code.
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::Closed { .. } => status::ENOTCONN,
            Self::Io { source } => source.raw_os_error().unwrap_or(status::EIO),
            Self::Framing(WireError::RecordCapacity { .. } | WireError::RecordTooLarge { .. }) => {
                status::E2BIG
            }
            Self::Framing(_) => status::EINVAL,
            Self::Rejected { status } => *status,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(source: io::Error) -> Self {
        Self::Io { source }
    }
}

/// Errors surfaced while binding or running the socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The TCP host name did not resolve.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
        /// Resolver failure.
        #[source]
        source: io::Error,
    },
    /// The TCP host name resolved to nothing.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
    },
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: String,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    /// Another daemon answers on the socket path.
    #[error("existing unix socket {path} is already in use")]
    UnixInUse {
        /// Socket path.
        path: String,
    },
    /// Something other than a socket occupies the path.
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket {
        /// Offending path.
        path: String,
    },
    #[error("failed to inspect unix socket {path}: {source}")]
    UnixMetadata {
        /// Socket path.
        path: String,
        /// Metadata failure.
        #[source]
        source: io::Error,
    },
    #[error("failed to probe existing unix socket {path}: {source}")]
    UnixConnect {
        /// Socket path.
        path: String,
        /// Probe failure.
        #[source]
        source: io::Error,
    },
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        /// Socket path.
        path: String,
        /// Removal failure.
        #[source]
        source: io::Error,
    },
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn the accept thread: {source}")]
    Spawn {
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}
