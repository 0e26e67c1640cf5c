//! Launch and shutdown failures.

use std::io;

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

/// Signal handlers could not be installed.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Why `ldmsd` stopped before or while serving.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("daemon bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("daemon socket listener failed: {0}")]
    Listener(#[from] ListenerError),
    #[error("failed to await shutdown signal: {0}")]
    Shutdown(#[from] ShutdownError),
}
