//! Test harness shared by the unit and behavioural suites.

mod cluster;
mod config_loader;
mod process_world;
mod reporter;
mod sinks;
mod transport;
mod world;

pub use cluster::{Cluster, LINK_RECORD, SET_INSTANCE, SET_SCHEMA, attrs};
pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use process_world::{ProcessTestWorld, StepResult, TestShutdownSignal};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use sinks::{MockEvents, OrderSink, Received, RecordingEvents, RecordingSink};
pub use transport::{CapturingTransport, Client, encode_records};
pub use world::{TestWorld, world};
