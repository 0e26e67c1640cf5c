use std::fmt;
use std::fs::DirBuilder;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Address the daemon accepts peer connections on.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum SocketEndpoint {
    /// Unix domain socket, used for local control clients.
    Unix {
        /// Filesystem path of the socket.
        path: Utf8PathBuf,
    },
    /// TCP listener, used for peer daemons on other hosts.
    Tcp {
        /// Host name or address to bind.
        host: String,
        /// Port to bind; `0` asks the kernel for a free port.
        port: u16,
    },
}

impl SocketEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Socket path when the endpoint is a Unix socket.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Creates the Unix socket's parent directory with mode `0700`.
    ///
    /// TCP endpoints need no filesystem preparation.
    ///
    /// # Errors
    ///
    /// Fails when the path has no parent or the directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) else {
            return Err(SocketPreparationError::MissingParent {
                path: path.to_path_buf(),
            });
        };

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        if let Err(source) = builder.create(parent.as_std_path())
            && source.kind() != std::io::ErrorKind::AlreadyExists
        {
            return Err(SocketPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            });
        }

        Ok(())
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if !input.contains("://") {
            return parse_listen_spec(input);
        }
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(SocketParseError::MissingUnixPath(input.to_owned()));
                }
                Ok(Self::unix(path))
            }
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| SocketParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host, port))
            }
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Parses the daemon's `xprt:port[:host]` listen form.
///
/// Only the `sock` transport is served here; the host defaults to every
/// interface.
fn parse_listen_spec(input: &str) -> Result<SocketEndpoint, SocketParseError> {
    let mut parts = input.splitn(3, ':');
    let xprt = parts.next().unwrap_or_default();
    if xprt != "sock" {
        return Err(SocketParseError::UnsupportedScheme(xprt.to_owned()));
    }
    let port = parts
        .next()
        .filter(|port| !port.is_empty())
        .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?
        .parse::<u16>()
        .map_err(|_| SocketParseError::InvalidPort(input.to_owned()))?;
    let host = parts.next().filter(|host| !host.is_empty()).unwrap_or(ANY_HOST);
    Ok(SocketEndpoint::tcp(host, port))
}

const ANY_HOST: &str = "0.0.0.0";

/// Errors encountered while parsing a [`SocketEndpoint`] from text.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Scheme was neither `unix` nor `tcp`.
    #[error("unsupported socket scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP host was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Port was not a number in range.
    #[error("invalid port in '{0}'")]
    InvalidPort(String),
    /// Unix socket path was absent.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// Text was not a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised when preparing socket directories.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// The socket path has no parent directory.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent {
        /// Offending socket path.
        path: Utf8PathBuf,
    },
    /// Creating the parent directory failed.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::unix("unix:///run/ldmsd/ctl.sock", SocketEndpoint::unix("/run/ldmsd/ctl.sock"))]
    #[case::tcp("tcp://10.0.0.5:411", SocketEndpoint::tcp("10.0.0.5", 411))]
    fn parses_and_displays(#[case] text: &str, #[case] expected: SocketEndpoint) {
        let endpoint: SocketEndpoint = text.parse().expect("endpoint should parse");
        assert_eq!(endpoint, expected);
        assert_eq!(endpoint.to_string(), text);
    }

    #[rstest]
    #[case::any_host("sock:411", SocketEndpoint::tcp("0.0.0.0", 411))]
    #[case::bound_host("sock:10001:127.0.0.1", SocketEndpoint::tcp("127.0.0.1", 10001))]
    fn parses_listen_specs(#[case] text: &str, #[case] expected: SocketEndpoint) {
        assert_eq!(text.parse::<SocketEndpoint>().expect("listen spec"), expected);
    }

    #[rstest]
    #[case::scheme("udp://host:1")]
    #[case::port("tcp://host")]
    #[case::xprt("rdma:411")]
    #[case::listen_port("sock:")]
    #[case::port_range("sock:70000")]
    fn rejects_invalid_endpoints(#[case] text: &str) {
        assert!(text.parse::<SocketEndpoint>().is_err());
    }

    #[rstest]
    fn prepare_creates_private_parent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("nested").join("ldmsd.sock");
        let endpoint = SocketEndpoint::unix(socket.to_str().expect("utf8 path"));
        endpoint.prepare_filesystem().expect("prepare");
        let parent = socket.parent().expect("parent");
        assert!(parent.is_dir());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(parent).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[rstest]
    fn relative_socket_without_parent_is_rejected() {
        let endpoint = SocketEndpoint::unix("ldmsd.sock");
        assert!(matches!(
            endpoint.prepare_filesystem(),
            Err(SocketPreparationError::MissingParent { .. })
        ));
    }
}
