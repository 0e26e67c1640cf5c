//! Layered configuration for the ldmsd daemon.
//!
//! Values resolve from built-in defaults, then a configuration file, then
//! `LDMSD_*` environment variables, then command-line flags, using
//! [`ortho_config`]. The daemon reads its control socket, logging setup,
//! advertised name, and framing limits from here.

mod defaults;
mod logging;
mod socket;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_MAX_RECORD_BYTES, DEFAULT_TCP_PORT,
    default_log_filter, default_log_filter_string, default_log_format, default_max_message_bytes,
    default_max_record_bytes, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "LDMSD")]
pub struct Config {
    /// Endpoint peers and control clients connect to.
    #[ortho_config(default = default_socket_endpoint())]
    pub daemon_socket: SocketEndpoint,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log record encoding.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Name reported in hop diagnostics; the host name when unset.
    pub daemon_name: Option<String>,
    /// Largest record sent or accepted, header included.
    #[ortho_config(default = default_max_record_bytes())]
    pub max_record_bytes: usize,
    /// Ceiling on a reassembled message.
    #[ortho_config(default = default_max_message_bytes())]
    pub max_message_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            daemon_name: None,
            max_record_bytes: default_max_record_bytes(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl Config {
    /// Endpoint the daemon listens on.
    #[must_use]
    pub const fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log encoding.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Configured daemon name, if any.
    #[must_use]
    pub fn daemon_name(&self) -> Option<&str> {
        self.daemon_name.as_deref()
    }

    /// Per-record size limit.
    #[must_use]
    pub const fn max_record_bytes(&self) -> usize {
        self.max_record_bytes
    }

    /// Reassembly ceiling.
    #[must_use]
    pub const fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }
}
