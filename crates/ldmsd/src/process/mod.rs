//! Process supervision: launch, serve, and shut down on a signal.

mod errors;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use errors::{LaunchError, ShutdownError};
pub use launch::run_daemon;
pub use shutdown::{ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
