//! Control-plane engine of the ldmsd metrics daemon.
//!
//! Peers exchange JSON requests and replies framed into records (see
//! [`ldmsd_wire`]). The [`Engine`] reassembles records per connection and
//! message number, dispatches complete requests to the handler table, and
//! answers each request exactly once on the key it arrived with.
//!
//! Requests manage typed configuration objects (`create`, `update`,
//! `delete`, `query`, `export`), trace how a metric set reached this daemon
//! (`set_route`), exercise the protocol (`test_protocol`, `version`), and
//! subscribe peers to named streams (`stream_subscribe`).
//!
//! ## Forwarding
//!
//! Some requests are answered only after another daemon answers a nested
//! request. The handler parks a [`ForwardState`] in the pre-registered
//! response context of the nested request and returns
//! [`HandlerOutcome::InProgress`]. The continuation holds a counted
//! reference to the original request, which therefore outlives the handler
//! until the nested response arrives, the send fails, or the link closes.
//!
//! ## Streams
//!
//! The [`StreamBus`] delivers publications to local subscribers in
//! most-recent-first order, parsing JSON payloads at most once per
//! publication.

mod bootstrap;
pub mod cfgobj;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod forward;
mod health;
mod locking;
mod process;
pub mod reassembly;
pub mod reply;
pub mod status;
pub mod stream;
pub mod telemetry;
pub mod topology;
pub mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
    resolve_daemon_name,
};
pub use context::{ContextRef, RequestPhase};
pub use dispatch::{DispatchError, HandlerOutcome};
pub use engine::{Engine, EngineBuilder};
pub use forward::{ForwardError, ForwardKind, ForwardState};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon};
pub use reassembly::{Assembly, IndexKind, Reassembler, ReassemblyError};
pub use reply::{ItemResult, Reply};
pub use stream::{Delivery, DeliveryMode, StreamBus, StreamError, StreamSink, Subscription};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{SecurityContext, Transport, TransportError};

#[cfg(test)]
mod tests;
