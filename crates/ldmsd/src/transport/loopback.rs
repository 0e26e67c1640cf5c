//! In-process transport joining two engines.
//!
//! Each side of a pair hands records straight to the peer engine on the
//! calling thread, so forwarding chains complete synchronously. Sides can be
//! told to fail sends or be disconnected to exercise error paths.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use super::{SecurityContext, Transport, TransportError, next_connection_id};
use crate::engine::Engine;
use crate::status;

/// One direction of an in-process connection.
#[derive(Debug)]
pub struct LoopbackTransport {
    id: u64,
    local: Weak<Engine>,
    remote: Weak<Engine>,
    peer: OnceLock<Weak<LoopbackTransport>>,
    max_record: usize,
    security: SecurityContext,
    failure: AtomicI32,
    closed: AtomicBool,
    sent: AtomicUsize,
}

impl LoopbackTransport {
    fn new(local: &Arc<Engine>, remote: &Arc<Engine>, max_record: usize) -> Self {
        Self {
            id: next_connection_id(),
            local: Arc::downgrade(local),
            remote: Arc::downgrade(remote),
            peer: OnceLock::new(),
            max_record,
            security: SecurityContext::current(),
            failure: AtomicI32::new(status::OK),
            closed: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
        }
    }

    /// Makes every later send fail with `status`; `0` restores delivery.
    pub fn fail_sends(&self, status: i32) {
        self.failure.store(status, Ordering::SeqCst);
    }

    /// Records delivered through this side.
    #[must_use]
    pub fn records_sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Tears down both directions and notifies both engines.
    pub fn disconnect(&self) {
        let peer = self.peer.get().and_then(Weak::upgrade);
        self.closed.store(true, Ordering::SeqCst);
        if let Some(peer) = &peer {
            peer.closed.store(true, Ordering::SeqCst);
        }
        if let Some(local) = self.local.upgrade() {
            local.release_connection(self.id);
        }
        if let (Some(remote), Some(peer)) = (self.remote.upgrade(), peer) {
            remote.release_connection(peer.id);
        }
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, record: &[u8]) -> Result<(), TransportError> {
        let closed = TransportError::Closed {
            connection: self.id,
        };
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed);
        }
        let failure = self.failure.load(Ordering::SeqCst);
        if failure != status::OK {
            return Err(TransportError::Rejected { status: failure });
        }
        let (Some(remote), Some(peer)) = (
            self.remote.upgrade(),
            self.peer.get().and_then(Weak::upgrade),
        ) else {
            return Err(closed);
        };
        self.sent.fetch_add(1, Ordering::SeqCst);
        let inbound: Arc<dyn Transport> = peer;
        remote.handle_record(record, &inbound);
        Ok(())
    }

    fn max_message_size(&self) -> usize {
        self.max_record
    }

    fn connection_id(&self) -> u64 {
        self.id
    }

    fn security_context(&self) -> SecurityContext {
        self.security
    }
}

/// Both directions of a loopback connection.
#[derive(Debug, Clone)]
pub struct LoopbackPair {
    /// Transport `a` uses to reach `b`.
    pub a_to_b: Arc<LoopbackTransport>,
    /// Transport `b` uses to reach `a`.
    pub b_to_a: Arc<LoopbackTransport>,
}

/// Connects two engines with records capped at `max_record` bytes.
#[must_use]
pub fn connect(a: &Arc<Engine>, b: &Arc<Engine>, max_record: usize) -> LoopbackPair {
    let a_to_b = Arc::new(LoopbackTransport::new(a, b, max_record));
    let b_to_a = Arc::new(LoopbackTransport::new(b, a, max_record));
    let _ = a_to_b.peer.set(Arc::downgrade(&b_to_a));
    let _ = b_to_a.peer.set(Arc::downgrade(&a_to_b));
    LoopbackPair { a_to_b, b_to_a }
}
