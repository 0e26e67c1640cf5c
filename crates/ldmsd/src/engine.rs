//! The protocol engine shared by every connection.
//!
//! One [`Engine`] owns the reassembly indices, the configuration objects,
//! the producer topology, the set directory and the stream bus. Transports
//! hand it raw records through [`Engine::handle_record`]; it reassembles
//! them, dispatches complete requests, resumes forwarded requests when their
//! responses arrive, and feeds stream publications to the bus.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ldmsd_wire::{
    CorrelationKey, MessageNumbers, MessageType, Record, RecordHeader, StreamMessage, StreamType,
};
use tracing::{debug, info, warn};

use crate::cfgobj::{
    CfgObjType, EventSink, LifecycleEvent, ObjectRegistry, RegistryError, TracingEventSink,
};
use crate::context::ContextRef;
use crate::dispatch;
use crate::forward;
use crate::reassembly::{Assembly, IndexKind, Reassembler, ReassemblyError};
use crate::reply::Reply;
use crate::status;
use crate::stream::{RemoteSubscribers, StreamBus, StreamError, publish_remote};
use crate::topology::{SetDirectory, Topology};
use crate::transport::{SecurityContext, Transport, TransportError, send_message};

const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

/// Daemon name used when none is configured and the host name is unknown.
pub const DEFAULT_DAEMON_NAME: &str = "ldmsd";

/// Default reassembly ceiling for one logical message.
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// Builder for [`Engine`].
pub struct EngineBuilder {
    name: String,
    max_message: usize,
    events: Arc<dyn EventSink>,
    credentials: SecurityContext,
}

impl EngineBuilder {
    /// Starts a builder with default limits, a tracing event sink and the
    /// credentials of this process.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_message: DEFAULT_MAX_MESSAGE,
            events: Arc::new(TracingEventSink),
            credentials: SecurityContext::current(),
        }
    }

    /// Sets the reassembly ceiling.
    #[must_use]
    pub const fn max_message(mut self, max_message: usize) -> Self {
        self.max_message = max_message;
        self
    }

    /// Sets the receiver of object lifecycle events.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the credentials permission checks compare requesters against.
    #[must_use]
    pub const fn credentials(mut self, credentials: SecurityContext) -> Self {
        self.credentials = credentials;
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> Arc<Engine> {
        let msg_numbers = Arc::new(MessageNumbers::new());
        Arc::new(Engine {
            name: self.name,
            reassembler: Reassembler::new(self.max_message),
            objects: ObjectRegistry::new(),
            topology: Topology::new(),
            sets: SetDirectory::new(),
            streams: StreamBus::new(),
            remote_streams: RemoteSubscribers::new(Arc::clone(&msg_numbers)),
            events: self.events,
            msg_numbers,
            configured: AtomicBool::new(false),
            credentials: self.credentials,
        })
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("EngineBuilder")
            .field("name", &self.name)
            .field("max_message", &self.max_message)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Control-plane state of one daemon.
pub struct Engine {
    name: String,
    reassembler: Reassembler,
    objects: ObjectRegistry,
    topology: Topology,
    sets: SetDirectory,
    streams: StreamBus,
    remote_streams: Arc<RemoteSubscribers>,
    events: Arc<dyn EventSink>,
    msg_numbers: Arc<MessageNumbers>,
    configured: AtomicBool,
    credentials: SecurityContext,
}

impl Engine {
    /// Shortcut for [`EngineBuilder::new`].
    #[must_use]
    pub fn builder(name: impl Into<String>) -> EngineBuilder {
        EngineBuilder::new(name)
    }

    /// Daemon name reported in hop diagnostics and set routes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request and response indices.
    #[must_use]
    pub const fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Configuration objects.
    #[must_use]
    pub const fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    /// Producer links.
    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Metric sets known to this daemon.
    #[must_use]
    pub const fn sets(&self) -> &SetDirectory {
        &self.sets
    }

    /// Local stream bus.
    #[must_use]
    pub const fn streams(&self) -> &StreamBus {
        &self.streams
    }

    /// Credentials the daemon runs with.
    #[must_use]
    pub const fn credentials(&self) -> SecurityContext {
        self.credentials
    }

    /// Allocates the message number of an outbound message.
    pub fn next_msg_no(&self) -> u32 {
        self.msg_numbers.next_msg_no()
    }

    /// Whether the initial configuration phase has finished.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    /// Ends the initial configuration phase; later enable/disable changes
    /// are posted as lifecycle events.
    pub fn mark_configured(&self) {
        if !self.configured.swap(true, Ordering::SeqCst) {
            info!(target: ENGINE_TARGET, daemon = %self.name, "initial configuration complete");
        }
    }

    /// Records that `name` was enabled or disabled by an update.
    pub(crate) fn object_state_changed(&self, schema: CfgObjType, name: &str, enabled: bool) {
        if !self.is_configured() {
            debug!(target: ENGINE_TARGET, %schema, name, enabled, "state change before configuration");
            return;
        }
        self.events
            .post(&LifecycleEvent::transition(schema, name, enabled));
    }

    /// Deletes an object; a deleted producer loses its link.
    ///
    /// # Errors
    ///
    /// Propagates [`ObjectRegistry::remove`] failures.
    pub fn delete_object(
        &self,
        schema: CfgObjType,
        name: &str,
        requester: SecurityContext,
    ) -> Result<(), RegistryError> {
        self.objects.remove(schema, name, requester)?;
        if schema == CfgObjType::Prdcr && self.topology.detach(name).is_some() {
            debug!(target: ENGINE_TARGET, producer = name, "detached deleted producer");
        }
        Ok(())
    }

    /// Records `link` as the connection to the producer object `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when no such producer exists.
    pub fn attach_producer(
        &self,
        name: &str,
        link: Arc<dyn Transport>,
    ) -> Result<(), RegistryError> {
        if self.objects.find(CfgObjType::Prdcr, name).is_none() {
            return Err(RegistryError::NotFound {
                schema: CfgObjType::Prdcr,
                name: name.to_owned(),
            });
        }
        debug!(
            target: ENGINE_TARGET,
            producer = name,
            connection = link.connection_id(),
            "producer attached"
        );
        self.topology.attach(name, link);
        Ok(())
    }

    /// Republishes `stream` to the peer behind `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadySubscribed`] for a repeated
    /// subscription from the same connection.
    pub fn subscribe_remote(
        &self,
        stream: &str,
        transport: &Arc<dyn Transport>,
    ) -> Result<(), StreamError> {
        self.remote_streams.subscribe(&self.streams, stream, transport)
    }

    /// Sends a publication to a peer as a STREAM message.
    ///
    /// # Errors
    ///
    /// Fails when the publication cannot be encoded or sent.
    pub fn publish_remote(
        &self,
        transport: &dyn Transport,
        stream: &str,
        stream_type: StreamType,
        data: &[u8],
    ) -> Result<usize, StreamError> {
        let message = StreamMessage::new(stream, stream_type, data);
        publish_remote(transport, self.next_msg_no(), &message)
    }

    /// Processes one record received on `transport`.
    ///
    /// Protocol violations are answered with an error reply when they
    /// concern a request; the connection stays usable either way.
    pub fn handle_record(&self, bytes: &[u8], transport: &Arc<dyn Transport>) {
        let record = match Record::parse(bytes) {
            Ok(record) => record,
            Err(error) => {
                warn!(
                    target: ENGINE_TARGET,
                    connection = transport.connection_id(),
                    error = %error,
                    "dropping malformed record"
                );
                return;
            }
        };
        match self.reassembler.handle_record(&record, transport) {
            Ok(Assembly::Pending) => {}
            Ok(Assembly::Complete(context)) => self.complete(&context),
            Err(error) => self.reassembly_failed(record.header.msg_type, transport, &error),
        }
    }

    fn complete(&self, context: &ContextRef) {
        match context.message_type() {
            MessageType::Request => dispatch::process(self, context),
            MessageType::Response => self.resume(context),
            MessageType::Stream => self.deliver(context),
        }
    }

    fn resume(&self, context: &ContextRef) {
        match context.inner().take_continuation() {
            Some(state) => forward::complete(state, context.document()),
            None => warn!(
                target: ENGINE_TARGET,
                daemon = %self.name,
                key = %context.key(),
                "response has no waiting request"
            ),
        }
    }

    fn deliver(&self, context: &ContextRef) {
        let payload = context.payload();
        match StreamMessage::decode(&payload) {
            Ok(message) => {
                let delivered =
                    self.streams
                        .publish(&message.name, message.stream_type, &message.data);
                debug!(
                    target: ENGINE_TARGET,
                    stream = %message.name,
                    delivered,
                    "stream message published"
                );
            }
            Err(error) => warn!(
                target: ENGINE_TARGET,
                key = %context.key(),
                error = %error,
                "dropping malformed stream message"
            ),
        }
    }

    fn reassembly_failed(
        &self,
        msg_type: MessageType,
        transport: &Arc<dyn Transport>,
        error: &ReassemblyError,
    ) {
        warn!(
            target: ENGINE_TARGET,
            key = %error.key(),
            status = error.status(),
            error = %error,
            "reassembly failed"
        );
        if msg_type == MessageType::Request {
            self.send_error(transport.as_ref(), error.key(), "", error.status(), &error.to_string());
        }
    }

    /// Answers a record larger than the transport accepts.
    ///
    /// The message the record belonged to is dropped and the sender is told
    /// the maximum record length.
    pub fn reject_oversized(&self, header: &RecordHeader, transport: &Arc<dyn Transport>) {
        let key = CorrelationKey::new(transport.connection_id(), header.key.msg_no);
        let max = transport.max_message_size();
        warn!(
            target: ENGINE_TARGET,
            %key,
            rec_len = header.rec_len,
            max,
            "record exceeds the transport maximum"
        );
        self.reassembler
            .abort(IndexKind::from(header.msg_type), key, status::E2BIG);
        if header.msg_type == MessageType::Request {
            let msg = format!("The maximum length is '{max}'");
            self.send_error(transport.as_ref(), key, "rec_adv", status::E2BIG, &msg);
        }
    }

    /// Sends a one-off error reply on `key`.
    pub fn send_error(
        &self,
        transport: &dyn Transport,
        key: CorrelationKey,
        request: &str,
        status: i32,
        msg: &str,
    ) {
        let reply = Reply::error(request, key.msg_no, status, msg);
        let sent = reply
            .to_bytes()
            .map_err(|error| error.to_string())
            .and_then(|payload| {
                send_message(transport, MessageType::Response, key, &payload)
                    .map_err(|error: TransportError| error.to_string())
            });
        if let Err(error) = sent {
            warn!(target: ENGINE_TARGET, %key, error = %error, "failed to send error reply");
        }
    }

    /// Forgets everything tied to a closed connection.
    ///
    /// Pending messages are dropped, forwarded requests waiting on the
    /// connection are answered with `ENOTCONN`, and stream subscriptions and
    /// producer links over it are removed.
    pub fn release_connection(&self, connection: u64) {
        let released = self.reassembler.release_connection(connection);
        let abandoned = released.responses.len();
        for context in released.responses {
            let state = context.inner().take_continuation();
            // Drop the response context before answering the client.
            drop(context);
            if let Some(state) = state {
                forward::abandon(state, status::ENOTCONN);
            }
        }
        let subscriptions = self.remote_streams.release(&self.streams, connection);
        let links = self.topology.detach_connection(connection);
        debug!(
            target: ENGINE_TARGET,
            connection,
            requests = released.requests,
            abandoned,
            subscriptions,
            links,
            "connection released"
        );
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Engine")
            .field("name", &self.name)
            .field("reassembler", &self.reassembler)
            .field("objects", &self.objects)
            .field("topology", &self.topology)
            .field("streams", &self.streams)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}
