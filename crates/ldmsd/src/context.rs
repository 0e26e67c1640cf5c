//! Request contexts and their counted handles.
//!
//! A context owns the reassembly state of one logical message: the receive
//! buffer, the writer reused for reply records, the parsed document, and an
//! optional forwarding continuation. [`ContextRef`] is the only way to hold
//! one. Each handle counts as one reference; when the last handle is dropped
//! the context removes itself from the index it was registered in, and no
//! handle can be obtained for it afterwards.
//!
//! A freshly registered context carries one reference that belongs to the
//! reassembler until the message completes. Whoever claims it first (the
//! end-of-message record, connection teardown, or an eviction) becomes its
//! owner, so the creation reference is released exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use bytes::BytesMut;
use dashmap::DashMap;
use ldmsd_wire::{CorrelationKey, MessageType, RecordWriter};
use serde_json::Value;

use crate::dispatch::DispatchError;
use crate::forward::ForwardState;
use crate::locking::lock;
use crate::reply::Reply;
use crate::transport::{SecurityContext, Transport, TransportError, send_with};

/// Index from correlation key to registered context.
pub(crate) type ContextIndex = DashMap<CorrelationKey, Arc<ContextInner>>;

/// Progress of a request through local handling and forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// The local handler has not produced a reply yet.
    AwaitingLocal,
    /// A nested request was forwarded and its response is outstanding.
    AwaitingNested,
    /// The terminal reply was sent.
    Complete,
}

pub(crate) struct ContextInner {
    key: CorrelationKey,
    msg_type: MessageType,
    transport: Arc<dyn Transport>,
    recv: Mutex<BytesMut>,
    writer: Mutex<Option<RecordWriter>>,
    document: OnceLock<Result<Value, String>>,
    continuation: Mutex<Option<ForwardState>>,
    phase: Mutex<RequestPhase>,
    started: AtomicBool,
    claimed: AtomicBool,
    reply_sent: AtomicBool,
    refs: AtomicUsize,
    index: Weak<ContextIndex>,
}

impl ContextInner {
    /// Builds a context holding its unclaimed creation reference.
    pub(crate) fn new(
        key: CorrelationKey,
        msg_type: MessageType,
        transport: Arc<dyn Transport>,
        index: &Arc<ContextIndex>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            msg_type,
            transport,
            recv: Mutex::new(BytesMut::new()),
            writer: Mutex::new(None),
            document: OnceLock::new(),
            continuation: Mutex::new(None),
            phase: Mutex::new(RequestPhase::AwaitingLocal),
            started: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
            reply_sent: AtomicBool::new(false),
            refs: AtomicUsize::new(1),
            index: Arc::downgrade(index),
        })
    }

    pub(crate) const fn key(&self) -> CorrelationKey {
        self.key
    }

    /// Marks the first record as seen; `false` if it already was.
    pub(crate) fn start(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    /// Appends `payload`, growing the buffer to at least twice its size.
    ///
    /// Returns the length the buffer would reach when that exceeds `limit`,
    /// leaving the buffer untouched.
    pub(crate) fn append(&self, payload: &[u8], limit: usize) -> Result<(), usize> {
        let mut recv = lock(&self.recv);
        let needed = recv.len() + payload.len();
        if needed > limit {
            return Err(needed);
        }
        if recv.capacity() < needed {
            let len = recv.len();
            let target = needed.max(recv.capacity().saturating_mul(2)).min(limit);
            recv.reserve(target - len);
        }
        recv.extend_from_slice(payload);
        Ok(())
    }

    pub(crate) fn set_continuation(&self, state: ForwardState) {
        *lock(&self.continuation) = Some(state);
    }

    pub(crate) fn take_continuation(&self) -> Option<ForwardState> {
        lock(&self.continuation).take()
    }

    /// Sends `payload` on this context's key through its own writer.
    pub(crate) fn send(&self, msg_type: MessageType, payload: &[u8]) -> Result<usize, DispatchError> {
        let mut slot = lock(&self.writer);
        let mut writer = match slot.take() {
            Some(writer) => writer,
            None => RecordWriter::new(self.transport.max_message_size())
                .map_err(TransportError::from)?,
        };
        let sent = send_with(&mut writer, self.transport.as_ref(), msg_type, self.key, payload);
        *slot = Some(writer);
        Ok(sent?)
    }
}

/// Counted handle to a request context.
pub struct ContextRef {
    inner: Arc<ContextInner>,
}

impl ContextRef {
    /// Takes ownership of the creation reference, at most once per context.
    pub(crate) fn claim(inner: Arc<ContextInner>) -> Option<Self> {
        (!inner.claimed.swap(true, Ordering::SeqCst)).then_some(Self { inner })
    }

    /// Adds a reference unless the context is already being destroyed.
    pub(crate) fn acquire(inner: &Arc<ContextInner>) -> Option<Self> {
        inner
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                (refs > 0).then(|| refs + 1)
            })
            .ok()
            .map(|_| Self {
                inner: Arc::clone(inner),
            })
    }

    /// Correlation key of the message.
    #[must_use]
    pub fn key(&self) -> CorrelationKey {
        self.inner.key
    }

    /// Kind of message reassembled into this context.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.inner.msg_type
    }

    /// Connection the message arrived on.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Credentials of the sending peer.
    #[must_use]
    pub fn security_context(&self) -> SecurityContext {
        self.inner.transport.security_context()
    }

    /// Number of live handles.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.inner.refs.load(Ordering::SeqCst)
    }

    /// Current request phase.
    #[must_use]
    pub fn phase(&self) -> RequestPhase {
        *lock(&self.inner.phase)
    }

    pub(crate) fn set_phase(&self, phase: RequestPhase) {
        *lock(&self.inner.phase) = phase;
    }

    /// Copy of the reassembled payload.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        lock(&self.inner.recv).to_vec()
    }

    /// Whether a terminal reply went out.
    #[must_use]
    pub fn reply_sent(&self) -> bool {
        self.inner.reply_sent.load(Ordering::SeqCst)
    }

    /// Parses the payload as JSON on first use and returns the cached result.
    ///
    /// # Errors
    ///
    /// Returns the parser's message when the payload is not valid JSON.
    pub fn document(&self) -> Result<&Value, &str> {
        self.inner
            .document
            .get_or_init(|| {
                let recv = lock(&self.inner.recv);
                serde_json::from_slice(&recv).map_err(|error| error.to_string())
            })
            .as_ref()
            .map_err(String::as_str)
    }

    /// Sends the terminal reply on this context's key.
    ///
    /// # Errors
    ///
    /// Fails with [`DispatchError::ReplyAlreadySent`] on a second call, and
    /// propagates serialization and transport failures.
    pub fn send_reply(&self, reply: &Reply) -> Result<usize, DispatchError> {
        if self.inner.reply_sent.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::ReplyAlreadySent { key: self.key() });
        }
        self.set_phase(RequestPhase::Complete);
        let payload = reply.to_bytes()?;
        self.inner.send(MessageType::Response, &payload)
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }
}

impl Clone for ContextRef {
    fn clone(&self) -> Self {
        self.inner.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for ContextRef {
    fn drop(&mut self) {
        if self.inner.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if let Some(index) = self.inner.index.upgrade() {
            index.remove_if(&self.inner.key, |_, registered| {
                Arc::ptr_eq(registered, &self.inner)
            });
        }
        // Release a pending forward's hold on its client outside the lock.
        let pending = self.inner.take_continuation();
        drop(pending);
    }
}

impl fmt::Debug for ContextRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ContextRef")
            .field("key", &self.inner.key)
            .field("msg_type", &self.inner.msg_type)
            .field("refs", &self.ref_count())
            .finish_non_exhaustive()
    }
}
