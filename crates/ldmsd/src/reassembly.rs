//! Reassembly of records into complete messages.
//!
//! Requests and stream publications share one index and responses use a
//! second, so a peer reusing a message number in both directions never
//! collides. Both are sharded maps used for point lookups only, and no shard
//! lock is held while a context is dispatched or a reply is sent.
//!
//! Contexts are keyed by the local identity of the connection a record
//! arrived on together with the record's message number. The `conn_id` a
//! peer writes into the header is informational.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use ldmsd_wire::{CorrelationKey, MessageType, Record};
use thiserror::Error;
use tracing::debug;

use crate::context::{ContextIndex, ContextInner, ContextRef};
use crate::forward;
use crate::status;
use crate::transport::Transport;

const REASSEMBLY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reassembly");

/// Result of feeding one record to the reassembler.
#[derive(Debug)]
pub enum Assembly {
    /// The record completed a message; the handle owns its context.
    Complete(ContextRef),
    /// More records are expected.
    Pending,
}

/// Protocol violations detected during reassembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    /// A start-of-message record reused a pending key.
    #[error("Duplicate message number {}:{} received", key.msg_no, key.conn_id)]
    DuplicateMessage {
        /// Offending key.
        key: CorrelationKey,
    },
    /// A continuation record named no pending message.
    #[error("The message no {} was not found.", key.msg_no)]
    UnknownMessage {
        /// Offending key.
        key: CorrelationKey,
    },
    /// A response arrived for a request this node never sent.
    #[error("Cannot find the original request of a message number {}.", key.msg_no)]
    UnknownResponse {
        /// Offending key.
        key: CorrelationKey,
    },
    /// The message outgrew the reassembly ceiling and was discarded.
    #[error("The message {} exceeds the maximum length '{limit}'.", key.msg_no)]
    MessageTooLarge {
        /// Offending key.
        key: CorrelationKey,
        /// Configured ceiling.
        limit: usize,
    },
}

impl ReassemblyError {
    /// Status sent back to the peer.
    #[must_use]
    pub const fn status(&self) -> i32 {
        match self {
            Self::DuplicateMessage { .. } => status::EEXIST,
            Self::UnknownMessage { .. } | Self::UnknownResponse { .. } => status::ENOENT,
            Self::MessageTooLarge { .. } => status::E2BIG,
        }
    }

    /// Key of the message the error concerns.
    #[must_use]
    pub const fn key(&self) -> CorrelationKey {
        match self {
            Self::DuplicateMessage { key }
            | Self::UnknownMessage { key }
            | Self::UnknownResponse { key }
            | Self::MessageTooLarge { key, .. } => *key,
        }
    }
}

/// Which index a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Inbound requests and stream publications.
    Request,
    /// Responses to requests this node sent.
    Response,
}

impl From<MessageType> for IndexKind {
    fn from(msg_type: MessageType) -> Self {
        match msg_type {
            MessageType::Response => Self::Response,
            MessageType::Request | MessageType::Stream => Self::Request,
        }
    }
}

/// Contexts removed by [`Reassembler::release_connection`].
#[derive(Debug, Default)]
pub struct Released {
    /// Pending inbound messages discarded.
    pub requests: usize,
    /// Outbound requests whose responses will never arrive; their
    /// continuations still hold the original callers.
    pub responses: Vec<ContextRef>,
}

/// Owner of the request and response indices.
pub struct Reassembler {
    requests: Arc<ContextIndex>,
    responses: Arc<ContextIndex>,
    max_message: usize,
}

impl Reassembler {
    /// Builds a reassembler rejecting messages longer than `max_message`.
    #[must_use]
    pub fn new(max_message: usize) -> Self {
        Self {
            requests: Arc::new(ContextIndex::new()),
            responses: Arc::new(ContextIndex::new()),
            max_message,
        }
    }

    /// Ceiling applied to reassembled messages.
    #[must_use]
    pub const fn max_message(&self) -> usize {
        self.max_message
    }

    fn index(&self, kind: IndexKind) -> &Arc<ContextIndex> {
        match kind {
            IndexKind::Request => &self.requests,
            IndexKind::Response => &self.responses,
        }
    }

    /// Folds one record into its message.
    ///
    /// # Errors
    ///
    /// Returns a [`ReassemblyError`] for duplicate or unknown keys and for
    /// messages exceeding the ceiling. Other pending messages are unaffected.
    pub fn handle_record(
        &self,
        record: &Record<'_>,
        transport: &Arc<dyn Transport>,
    ) -> Result<Assembly, ReassemblyError> {
        let header = record.header;
        let key = CorrelationKey::new(transport.connection_id(), header.key.msg_no);
        let inner = match IndexKind::from(header.msg_type) {
            IndexKind::Request if header.flags.is_start() => {
                self.open_request(key, header.msg_type, transport)?
            }
            IndexKind::Request => self
                .pending(IndexKind::Request, key)
                .ok_or(ReassemblyError::UnknownMessage { key })?,
            IndexKind::Response => self.continue_response(key, header.flags.is_start())?,
        };

        if let Err(needed) = inner.append(record.payload, self.max_message) {
            debug!(
                target: REASSEMBLY_TARGET,
                %key,
                needed,
                limit = self.max_message,
                "discarding oversized message"
            );
            let orphan = inner.take_continuation();
            self.discard(inner);
            if let Some(state) = orphan {
                forward::abandon(state, status::E2BIG);
            }
            return Err(ReassemblyError::MessageTooLarge {
                key,
                limit: self.max_message,
            });
        }

        if !header.flags.is_end() {
            return Ok(Assembly::Pending);
        }
        ContextRef::claim(inner)
            .map(Assembly::Complete)
            .ok_or(ReassemblyError::UnknownMessage { key })
    }

    fn open_request(
        &self,
        key: CorrelationKey,
        msg_type: MessageType,
        transport: &Arc<dyn Transport>,
    ) -> Result<Arc<ContextInner>, ReassemblyError> {
        match self.requests.entry(key) {
            Entry::Occupied(_) => Err(ReassemblyError::DuplicateMessage { key }),
            Entry::Vacant(slot) => {
                let inner = ContextInner::new(key, msg_type, Arc::clone(transport), &self.requests);
                inner.start();
                slot.insert(Arc::clone(&inner));
                Ok(inner)
            }
        }
    }

    fn continue_response(
        &self,
        key: CorrelationKey,
        start: bool,
    ) -> Result<Arc<ContextInner>, ReassemblyError> {
        let inner = self
            .pending(IndexKind::Response, key)
            .ok_or(ReassemblyError::UnknownResponse { key })?;
        if start && !inner.start() {
            return Err(ReassemblyError::DuplicateMessage { key });
        }
        if !start && !inner.is_started() {
            return Err(ReassemblyError::UnknownMessage { key });
        }
        Ok(inner)
    }

    /// Registered context for `key` that has not completed yet.
    fn pending(&self, kind: IndexKind, key: CorrelationKey) -> Option<Arc<ContextInner>> {
        let inner = self.index(kind).get(&key).map(|entry| Arc::clone(entry.value()))?;
        (!inner.is_claimed()).then_some(inner)
    }

    /// Pre-registers the context a response to an outbound request will
    /// reassemble into.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::DuplicateMessage`] when the key is taken.
    pub(crate) fn register_response(
        &self,
        key: CorrelationKey,
        transport: &Arc<dyn Transport>,
    ) -> Result<Arc<ContextInner>, ReassemblyError> {
        match self.responses.entry(key) {
            Entry::Occupied(_) => Err(ReassemblyError::DuplicateMessage { key }),
            Entry::Vacant(slot) => {
                let inner = ContextInner::new(
                    key,
                    MessageType::Response,
                    Arc::clone(transport),
                    &self.responses,
                );
                slot.insert(Arc::clone(&inner));
                Ok(inner)
            }
        }
    }

    /// Releases the creation reference of a context that will not complete.
    ///
    /// Returns the handle when this call won the claim, so the caller can
    /// inspect the context before it is dropped.
    pub(crate) fn evict(&self, inner: Arc<ContextInner>) -> Option<ContextRef> {
        let key = inner.key();
        let claimed = ContextRef::claim(inner);
        if claimed.is_some() {
            debug!(target: REASSEMBLY_TARGET, %key, "evicted pending context");
        }
        claimed
    }

    fn discard(&self, inner: Arc<ContextInner>) {
        drop(self.evict(inner));
    }

    /// Drops the pending message registered under `key`.
    ///
    /// A parked continuation is answered with `status`. Returns whether a
    /// pending message was found.
    pub fn abort(&self, kind: IndexKind, key: CorrelationKey, status: i32) -> bool {
        let Some(inner) = self.pending(kind, key) else {
            return false;
        };
        let orphan = inner.take_continuation();
        self.discard(inner);
        if let Some(state) = orphan {
            forward::abandon(state, status);
        }
        true
    }

    /// Counted handle to the context registered under `key`, if it is alive.
    #[must_use]
    pub fn lookup(&self, kind: IndexKind, key: CorrelationKey) -> Option<ContextRef> {
        let inner = self.index(kind).get(&key).map(|entry| Arc::clone(entry.value()))?;
        ContextRef::acquire(&inner)
    }

    /// Whether `key` is registered in the given index.
    #[must_use]
    pub fn contains(&self, kind: IndexKind, key: CorrelationKey) -> bool {
        self.index(kind).contains_key(&key)
    }

    /// Number of contexts registered in the given index.
    #[must_use]
    pub fn len(&self, kind: IndexKind) -> usize {
        self.index(kind).len()
    }

    /// Whether both indices are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.responses.is_empty()
    }

    /// Drops every pending context of `connection` in both indices.
    ///
    /// Contexts whose message already completed belong to their dispatcher
    /// and are left alone; they leave the index when that owner finishes.
    pub fn release_connection(&self, connection: u64) -> Released {
        let mut released = Released::default();
        for inner in Self::of_connection(&self.requests, connection) {
            if let Some(context) = self.evict(inner) {
                drop(context);
                released.requests += 1;
            }
        }
        for inner in Self::of_connection(&self.responses, connection) {
            if let Some(context) = self.evict(inner) {
                released.responses.push(context);
            }
        }
        released
    }

    fn of_connection(index: &ContextIndex, connection: u64) -> Vec<Arc<ContextInner>> {
        index
            .iter()
            .filter(|entry| entry.key().conn_id == connection)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl fmt::Debug for Reassembler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Reassembler")
            .field("requests", &self.requests.len())
            .field("responses", &self.responses.len())
            .field("max_message", &self.max_message)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use ldmsd_wire::{RecordFlags, RecordHeader};
    use rstest::{fixture, rstest};

    use super::*;
    use crate::tests::support::CapturingTransport;

    struct Fixture {
        reassembler: Reassembler,
        transport: Arc<dyn Transport>,
    }

    #[fixture]
    fn setup() -> Fixture {
        Fixture {
            reassembler: Reassembler::new(64),
            transport: Arc::new(CapturingTransport::new(128)),
        }
    }

    fn encode(msg_type: MessageType, flags: RecordFlags, msg_no: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = BytesMut::new();
        RecordHeader {
            msg_type,
            flags,
            key: CorrelationKey::new(0, msg_no),
            rec_len: u32::try_from(ldmsd_wire::HEADER_LEN + payload.len()).expect("small record"),
        }
        .encode(&mut bytes);
        bytes.extend_from_slice(payload);
        bytes.to_vec()
    }

    fn feed(
        fixture: &Fixture,
        msg_type: MessageType,
        flags: RecordFlags,
        msg_no: u32,
        payload: &[u8],
    ) -> Result<Assembly, ReassemblyError> {
        let bytes = encode(msg_type, flags, msg_no, payload);
        let record = Record::parse(&bytes).expect("valid record");
        fixture.reassembler.handle_record(&record, &fixture.transport)
    }

    fn key(fixture: &Fixture, msg_no: u32) -> CorrelationKey {
        CorrelationKey::new(fixture.transport.connection_id(), msg_no)
    }

    #[rstest]
    fn concatenates_payloads_and_completes_on_eom(setup: Fixture) {
        let request = MessageType::Request;
        assert!(matches!(
            feed(&setup, request, RecordFlags::SOM, 1, b"ab"),
            Ok(Assembly::Pending)
        ));
        assert!(matches!(
            feed(&setup, request, RecordFlags::NONE, 1, b"cd"),
            Ok(Assembly::Pending)
        ));
        let Ok(Assembly::Complete(context)) = feed(&setup, request, RecordFlags::EOM, 1, b"ef")
        else {
            panic!("expected completion");
        };
        assert_eq!(context.payload(), b"abcdef");
        assert!(setup.reassembler.contains(IndexKind::Request, key(&setup, 1)));
        drop(context);
        assert!(!setup.reassembler.contains(IndexKind::Request, key(&setup, 1)));
    }

    #[rstest]
    fn duplicate_start_leaves_pending_buffer_intact(setup: Fixture) {
        let request = MessageType::Request;
        feed(&setup, request, RecordFlags::SOM, 4, b"keep").expect("first record");
        let error = feed(&setup, request, RecordFlags::SOM, 4, b"lost").expect_err("duplicate");
        assert_eq!(error, ReassemblyError::DuplicateMessage { key: key(&setup, 4) });
        assert_eq!(error.status(), status::EEXIST);

        let Ok(Assembly::Complete(context)) = feed(&setup, request, RecordFlags::EOM, 4, b"!")
        else {
            panic!("expected completion");
        };
        assert_eq!(context.payload(), b"keep!");
    }

    #[rstest]
    fn continuation_without_start_is_unknown(setup: Fixture) {
        feed(&setup, MessageType::Request, RecordFlags::SOM, 2, b"x").expect("other key");
        let error = feed(&setup, MessageType::Request, RecordFlags::EOM, 3, b"y")
            .expect_err("unknown key");
        assert_eq!(error.status(), status::ENOENT);
        assert_eq!(setup.reassembler.len(IndexKind::Request), 1);
    }

    #[rstest]
    fn oversized_message_is_discarded(setup: Fixture) {
        feed(&setup, MessageType::Request, RecordFlags::SOM, 5, &[0; 40]).expect("first half");
        let error = feed(&setup, MessageType::Request, RecordFlags::EOM, 5, &[0; 40])
            .expect_err("too large");
        assert_eq!(error.status(), status::E2BIG);
        assert!(setup.reassembler.is_empty());
    }

    #[rstest]
    fn responses_require_registration(setup: Fixture) {
        let error = feed(&setup, MessageType::Response, RecordFlags::SOM | RecordFlags::EOM, 9, b"{}")
            .expect_err("unregistered response");
        assert_eq!(error, ReassemblyError::UnknownResponse { key: key(&setup, 9) });

        setup
            .reassembler
            .register_response(key(&setup, 9), &setup.transport)
            .expect("register");
        let outcome = feed(&setup, MessageType::Response, RecordFlags::SOM | RecordFlags::EOM, 9, b"{}");
        assert!(matches!(outcome, Ok(Assembly::Complete(_))));
        drop(outcome);
        assert!(setup.reassembler.is_empty());
    }

    #[rstest]
    fn request_and_response_numbers_do_not_collide(setup: Fixture) {
        setup
            .reassembler
            .register_response(key(&setup, 6), &setup.transport)
            .expect("register");
        feed(&setup, MessageType::Request, RecordFlags::SOM, 6, b"req").expect("request start");
        assert!(setup.reassembler.contains(IndexKind::Request, key(&setup, 6)));
        assert!(setup.reassembler.contains(IndexKind::Response, key(&setup, 6)));
    }

    #[rstest]
    fn release_connection_skips_completed_contexts(setup: Fixture) {
        feed(&setup, MessageType::Request, RecordFlags::SOM, 1, b"a").expect("pending");
        let Ok(Assembly::Complete(active)) =
            feed(&setup, MessageType::Request, RecordFlags::SOM | RecordFlags::EOM, 2, b"b")
        else {
            panic!("expected completion");
        };
        setup
            .reassembler
            .register_response(key(&setup, 3), &setup.transport)
            .expect("register");

        let released = setup.reassembler.release_connection(setup.transport.connection_id());
        assert_eq!(released.requests, 1);
        assert_eq!(released.responses.len(), 1);
        drop(released);

        assert_eq!(active.ref_count(), 1);
        assert!(setup.reassembler.contains(IndexKind::Request, key(&setup, 2)));
        drop(active);
        assert!(setup.reassembler.is_empty());
    }

    #[rstest]
    fn abort_drops_only_pending_messages(setup: Fixture) {
        feed(&setup, MessageType::Request, RecordFlags::SOM, 7, b"part").expect("pending");
        assert!(setup.reassembler.abort(IndexKind::Request, key(&setup, 7), status::E2BIG));
        assert!(!setup.reassembler.abort(IndexKind::Request, key(&setup, 7), status::E2BIG));
        assert!(setup.reassembler.is_empty());
    }

    #[rstest]
    fn lookup_never_resurrects_a_released_context(setup: Fixture) {
        let Ok(Assembly::Complete(context)) =
            feed(&setup, MessageType::Request, RecordFlags::SOM | RecordFlags::EOM, 8, b"z")
        else {
            panic!("expected completion");
        };
        let again = setup.reassembler.lookup(IndexKind::Request, key(&setup, 8));
        assert_eq!(again.as_ref().map(ContextRef::ref_count), Some(2));
        drop(again);
        drop(context);
        assert!(setup.reassembler.lookup(IndexKind::Request, key(&setup, 8)).is_none());
    }
}
