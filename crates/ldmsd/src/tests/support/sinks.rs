//! Stream and lifecycle event receivers for assertions.

use std::sync::Mutex;

use ldmsd_wire::StreamType;
use mockall::mock;
use serde_json::Value;

use crate::cfgobj::{EventSink, LifecycleEvent};
use crate::stream::{Delivery, StreamSink};

/// One delivery as seen by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub stream: String,
    pub ctxt: u64,
    pub stream_type: StreamType,
    pub data: Vec<u8>,
    pub json: Option<Value>,
}

/// Stream sink keeping every delivery in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Received>>,
}

impl RecordingSink {
    pub fn received(&self) -> Vec<Received> {
        self.received.lock().expect("sink mutex poisoned").clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .map(|received| String::from_utf8_lossy(&received.data).into_owned())
            .collect()
    }
}

impl StreamSink for RecordingSink {
    fn deliver(&self, ctxt: u64, delivery: &Delivery<'_>) {
        self.received
            .lock()
            .expect("sink mutex poisoned")
            .push(Received {
                stream: delivery.stream.to_owned(),
                ctxt,
                stream_type: delivery.stream_type,
                data: delivery.data.to_vec(),
                json: delivery.json.cloned(),
            });
    }
}

/// Appends its label to a shared log on every delivery.
#[derive(Debug)]
pub struct OrderSink {
    pub label: &'static str,
    pub log: std::sync::Arc<Mutex<Vec<&'static str>>>,
}

impl StreamSink for OrderSink {
    fn deliver(&self, _ctxt: u64, _delivery: &Delivery<'_>) {
        self.log.lock().expect("order log poisoned").push(self.label);
    }
}

mock! {
    pub Events {}

    impl EventSink for Events {
        fn post(&self, event: &LifecycleEvent);
    }
}

/// Event sink keeping every posted event.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }
}

impl EventSink for RecordingEvents {
    fn post(&self, event: &LifecycleEvent) {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .push(event.clone());
    }
}
