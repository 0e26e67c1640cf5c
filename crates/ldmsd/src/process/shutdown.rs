//! Termination signal handling.

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

use super::PROCESS_TARGET;
use super::errors::ShutdownError;

const TERMINATION_SIGNALS: [(i32, &str); 4] = [
    (SIGTERM, "SIGTERM"),
    (SIGINT, "SIGINT"),
    (SIGQUIT, "SIGQUIT"),
    (SIGHUP, "SIGHUP"),
];

/// Blocks until the daemon should stop.
pub trait ShutdownSignal: Send + Sync {
    /// Returns once shutdown should proceed.
    ///
    /// # Errors
    ///
    /// Fails when the notification mechanism cannot be installed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Waits for the first termination signal delivered to the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new(TERMINATION_SIGNALS.map(|(signal, _)| signal))
            .map_err(|source| ShutdownError::Install { source })?;
        if let Some(received) = signals.forever().next() {
            let name = TERMINATION_SIGNALS
                .iter()
                .find_map(|&(signal, name)| (signal == received).then_some(name))
                .unwrap_or("unknown");
            info!(target: PROCESS_TARGET, signal = name, "shutdown signal received");
        }
        Ok(())
    }
}
