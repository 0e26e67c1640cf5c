//! Accepted connections and the seam the listener hands them to.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;

use super::SecurityContext;

/// A connected control-socket peer.
#[derive(Debug)]
pub(crate) enum ConnectionStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Second handle on the same socket, used as the reply writer.
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        Ok(match self {
            Self::Tcp(stream) => Self::Tcp(stream.try_clone()?),
            Self::Unix(stream) => Self::Unix(stream.try_clone()?),
        })
    }

    pub(crate) fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }

    /// Credentials requests on this connection run with.
    ///
    /// Unix peers are identified by the kernel. TCP carries no credential
    /// exchange, so its peers act as this process.
    pub(crate) fn peer_security(&self) -> io::Result<SecurityContext> {
        match self {
            Self::Tcp(_) => Ok(SecurityContext::current()),
            Self::Unix(stream) => unix_peer_security(stream),
        }
    }

    /// Peer address for logs.
    pub(crate) fn peer(&self) -> String {
        match self {
            Self::Tcp(stream) => stream
                .peer_addr()
                .map_or_else(|_| "tcp:unknown".to_owned(), |addr| format!("tcp:{addr}")),
            Self::Unix(_) => "unix".to_owned(),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            Self::Unix(stream) => stream.flush(),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn unix_peer_security(stream: &UnixStream) -> io::Result<SecurityContext> {
    use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

    let credentials = getsockopt(stream, PeerCredentials)?;
    Ok(SecurityContext::new(credentials.uid(), credentials.gid()))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn unix_peer_security(_stream: &UnixStream) -> io::Result<SecurityContext> {
    Ok(SecurityContext::current())
}

/// Serves one accepted connection until the peer goes away.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, stream: ConnectionStream);
}
