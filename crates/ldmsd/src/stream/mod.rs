//! Named publish/subscribe streams.
//!
//! The registry lock guards only the name to stream map. Each stream has its
//! own lock that guards its subscriber list and is held for the whole of a
//! delivery pass, so two publications to one stream never interleave their
//! deliveries. Streams are created on first subscription and live as long
//! as the bus.

mod errors;
mod remote;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use ldmsd_wire::StreamType;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::locking::lock;

pub use self::errors::StreamError;
pub use self::remote::{RemoteSubscribers, publish_remote};

const STREAM_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::stream");

/// Form in which a subscriber wants JSON payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Raw bytes only.
    Raw,
    /// Raw bytes plus the parsed document; skipped when parsing fails.
    Parsed,
}

/// One publication as seen by a subscriber.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    /// Stream name.
    pub stream: &'a str,
    /// Payload kind.
    pub stream_type: StreamType,
    /// Payload bytes as published.
    pub data: &'a [u8],
    /// Parsed payload, present for parsed-mode subscribers.
    pub json: Option<&'a Value>,
}

/// Callback side of a subscription.
///
/// Called with the stream lock held; implementations must not subscribe
/// to or publish on the same bus.
pub trait StreamSink: Send + Sync {
    /// Receives one publication with the context given at subscription.
    fn deliver(&self, ctxt: u64, delivery: &Delivery<'_>);
}

struct Client {
    id: u64,
    sink: Arc<dyn StreamSink>,
    ctxt: u64,
    mode: DeliveryMode,
}

impl Client {
    fn is(&self, sink: &Arc<dyn StreamSink>, ctxt: u64) -> bool {
        self.ctxt == ctxt && std::ptr::addr_eq(Arc::as_ptr(&self.sink), Arc::as_ptr(sink))
    }
}

struct Stream {
    name: String,
    clients: Mutex<Vec<Client>>,
    published: AtomicU64,
    bytes: AtomicU64,
}

impl Stream {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            clients: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }
}

/// Handle returned by [`StreamBus::subscribe`].
#[derive(Clone)]
pub struct Subscription {
    stream: Weak<Stream>,
    id: u64,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.stream.upgrade().map(|stream| stream.name.clone());
        formatter
            .debug_struct("Subscription")
            .field("stream", &name)
            .field("id", &self.id)
            .finish()
    }
}

/// Registry of named streams.
#[derive(Default)]
pub struct StreamBus {
    streams: Mutex<HashMap<String, Arc<Stream>>>,
    next_id: AtomicU64,
}

impl StreamBus {
    /// Bus without streams.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber to `name`, creating the stream on first use.
    ///
    /// New subscribers are visited before older ones.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadySubscribed`] when the same sink and
    /// context already subscribe to the stream.
    pub fn subscribe(
        &self,
        name: &str,
        sink: Arc<dyn StreamSink>,
        ctxt: u64,
        mode: DeliveryMode,
    ) -> Result<Subscription, StreamError> {
        let mut streams = lock(&self.streams);
        let stream = Arc::clone(
            streams
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(Stream::new(name))),
        );
        let mut clients = lock(&stream.clients);
        drop(streams);

        if clients.iter().any(|client| client.is(&sink, ctxt)) {
            return Err(StreamError::AlreadySubscribed {
                stream: name.to_owned(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        clients.push(Client {
            id,
            sink,
            ctxt,
            mode,
        });
        debug!(target: STREAM_TARGET, stream = name, id, ?mode, "subscribed");
        Ok(Subscription {
            stream: Arc::downgrade(&stream),
            id,
        })
    }

    /// Removes a subscriber; the stream itself is kept.
    ///
    /// Returns whether the subscription was still active.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let Some(stream) = subscription.stream.upgrade() else {
            return false;
        };
        let mut clients = lock(&stream.clients);
        let before = clients.len();
        clients.retain(|client| client.id != subscription.id);
        before != clients.len()
    }

    /// Delivers `data` to every subscriber of `name`, newest first.
    ///
    /// A JSON payload is parsed at most once, and only when a parsed-mode
    /// subscriber is reached. Publishing to an unknown stream does nothing.
    /// Returns the number of deliveries made.
    pub fn publish(&self, name: &str, stream_type: StreamType, data: &[u8]) -> usize {
        let Some(stream) = lock(&self.streams).get(name).cloned() else {
            return 0;
        };
        let clients = lock(&stream.clients);
        stream.published.fetch_add(1, Ordering::Relaxed);
        stream
            .bytes
            .fetch_add(u64::try_from(data.len()).unwrap_or(u64::MAX), Ordering::Relaxed);

        let mut parsed: Option<Option<Value>> = None;
        let mut delivered = 0;
        for client in clients.iter().rev() {
            let json = match (client.mode, stream_type) {
                (DeliveryMode::Parsed, StreamType::Json) => {
                    let document = parsed.get_or_insert_with(|| parse(name, data));
                    match document.as_ref() {
                        Some(document) => Some(document),
                        None => continue,
                    }
                }
                (DeliveryMode::Parsed, StreamType::String) | (DeliveryMode::Raw, _) => None,
            };
            client.sink.deliver(
                client.ctxt,
                &Delivery {
                    stream: name,
                    stream_type,
                    data,
                    json,
                },
            );
            delivered += 1;
        }
        delivered
    }

    /// Number of subscribers of `name`; zero for unknown streams.
    #[must_use]
    pub fn subscriber_count(&self, name: &str) -> usize {
        lock(&self.streams)
            .get(name)
            .cloned()
            .map_or(0, |stream| lock(&stream.clients).len())
    }

    /// Whether the stream `name` has been created.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.streams).contains_key(name)
    }

    /// Describes every stream with its counters and subscribers.
    #[must_use]
    pub fn dump(&self) -> Value {
        let mut streams: Vec<Arc<Stream>> = lock(&self.streams).values().cloned().collect();
        streams.sort_by(|left, right| left.name.cmp(&right.name));
        let mut dump = Map::new();
        for stream in streams {
            let clients: Vec<Value> = lock(&stream.clients)
                .iter()
                .rev()
                .map(|client| {
                    let mode = match client.mode {
                        DeliveryMode::Raw => "raw",
                        DeliveryMode::Parsed => "parsed",
                    };
                    json!({ "id": client.id, "ctxt": client.ctxt, "mode": mode })
                })
                .collect();
            dump.insert(
                stream.name.clone(),
                json!({
                    "published": stream.published.load(Ordering::Relaxed),
                    "bytes": stream.bytes.load(Ordering::Relaxed),
                    "clients": clients,
                }),
            );
        }
        Value::Object(dump)
    }
}

impl fmt::Debug for StreamBus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StreamBus")
            .field("streams", &lock(&self.streams).len())
            .finish_non_exhaustive()
    }
}

fn parse(name: &str, data: &[u8]) -> Option<Value> {
    match serde_json::from_slice(data) {
        Ok(document) => Some(document),
        Err(error) => {
            debug!(
                target: STREAM_TARGET,
                stream = name,
                error = %error,
                "skipping parsed subscribers of malformed JSON"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests;
