//! Republishing stream data to peers that asked for it.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use ldmsd_wire::{CorrelationKey, MessageNumbers, MessageType, StreamMessage};
use tracing::{debug, warn};

use super::{Delivery, DeliveryMode, STREAM_TARGET, StreamBus, StreamError, StreamSink, Subscription};
use crate::transport::{Transport, send_message};

/// Encodes a publication and sends it to a peer as a STREAM message.
///
/// # Errors
///
/// Fails when the publication cannot be encoded or a record send fails.
pub fn publish_remote(
    transport: &dyn Transport,
    msg_no: u32,
    message: &StreamMessage,
) -> Result<usize, StreamError> {
    let payload = message.encode()?;
    let key = CorrelationKey::new(transport.connection_id(), msg_no);
    Ok(send_message(transport, MessageType::Stream, key, &payload)?)
}

struct Peer {
    transport: Weak<dyn Transport>,
    subscriptions: Vec<Subscription>,
}

/// Sink forwarding local publications to subscribed peer connections.
///
/// One instance serves every peer; the subscription context is the peer's
/// connection identity, so a connection subscribing twice to one stream is
/// detected as a duplicate.
pub struct RemoteSubscribers {
    peers: DashMap<u64, Peer>,
    msg_numbers: Arc<MessageNumbers>,
}

impl RemoteSubscribers {
    /// Builds a sink numbering outbound messages from `msg_numbers`.
    #[must_use]
    pub fn new(msg_numbers: Arc<MessageNumbers>) -> Arc<Self> {
        Arc::new(Self {
            peers: DashMap::new(),
            msg_numbers,
        })
    }

    /// Subscribes the peer behind `transport` to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadySubscribed`] when the peer already
    /// receives the stream.
    pub fn subscribe(
        self: &Arc<Self>,
        bus: &StreamBus,
        name: &str,
        transport: &Arc<dyn Transport>,
    ) -> Result<(), StreamError> {
        let connection = transport.connection_id();
        self.peers.entry(connection).or_insert_with(|| Peer {
            transport: Arc::downgrade(transport),
            subscriptions: Vec::new(),
        });
        let sink: Arc<dyn StreamSink> = Arc::clone(self) as Arc<dyn StreamSink>;
        let subscription = bus.subscribe(name, sink, connection, DeliveryMode::Raw)?;
        if let Some(mut peer) = self.peers.get_mut(&connection) {
            peer.subscriptions.push(subscription);
        }
        Ok(())
    }

    /// Drops every subscription held for `connection`.
    pub fn release(&self, bus: &StreamBus, connection: u64) -> usize {
        let Some((_, peer)) = self.peers.remove(&connection) else {
            return 0;
        };
        peer.subscriptions
            .iter()
            .filter(|subscription| bus.unsubscribe(subscription))
            .count()
    }

    /// Number of peers holding at least one subscription.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl StreamSink for RemoteSubscribers {
    fn deliver(&self, ctxt: u64, delivery: &Delivery<'_>) {
        let transport = self
            .peers
            .get(&ctxt)
            .and_then(|peer| peer.transport.upgrade());
        let Some(transport) = transport else {
            debug!(target: STREAM_TARGET, connection = ctxt, "peer gone, dropping publication");
            return;
        };
        let message = StreamMessage::new(delivery.stream, delivery.stream_type, delivery.data);
        if let Err(error) = publish_remote(transport.as_ref(), self.msg_numbers.next_msg_no(), &message)
        {
            warn!(
                target: STREAM_TARGET,
                connection = ctxt,
                stream = delivery.stream,
                error = %error,
                "failed to republish to peer"
            );
        }
    }
}
