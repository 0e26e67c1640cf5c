//! Daemon launch sequencing.

use std::sync::Arc;

use tracing::info;

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::transport::{ConnectionHandler, RecordConnectionHandler, SocketListener};

use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::PROCESS_TARGET;

/// Runs the daemon with the production collaborators until a termination
/// signal arrives.
///
/// # Errors
///
/// Fails when bootstrap, the listener or the signal handlers fail.
pub fn run_daemon() -> Result<(), LaunchError> {
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    run_daemon_with(&SystemConfigLoader, reporter, &SystemShutdownSignal)
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    shutdown: &dyn ShutdownSignal,
) -> Result<(), LaunchError> {
    let daemon = bootstrap_with(loader, reporter)?;
    let config = daemon.config();
    info!(
        target: PROCESS_TARGET,
        daemon = daemon.engine().name(),
        socket = %config.daemon_socket(),
        "starting daemon runtime"
    );

    let listener = SocketListener::bind(config.daemon_socket())?;
    let handler: Arc<dyn ConnectionHandler> = Arc::new(RecordConnectionHandler::new(
        Arc::clone(daemon.engine()),
        config.max_record_bytes(),
    ));
    let listener_handle = listener.start(handler)?;
    daemon.reporter().listener_ready(config.daemon_socket());
    daemon.finish_configuration();

    shutdown.wait()?;
    listener_handle.shutdown();
    listener_handle.join()?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}
