use std::sync::{Arc, Mutex};

use ldmsd_wire::{MessageNumbers, StreamType};
use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::tests::support::{CapturingTransport, OrderSink, RecordingSink};
use crate::transport::Transport;

#[fixture]
fn bus() -> StreamBus {
    StreamBus::new()
}

fn recording() -> (Arc<RecordingSink>, Arc<dyn StreamSink>) {
    let sink = Arc::new(RecordingSink::default());
    let dynamic: Arc<dyn StreamSink> = sink.clone();
    (sink, dynamic)
}

#[rstest]
fn newest_subscriber_is_visited_first(bus: StreamBus) {
    let log = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let sink = Arc::new(OrderSink {
            label,
            log: Arc::clone(&log),
        });
        bus.subscribe("metrics", sink, 0, DeliveryMode::Raw)
            .expect("subscribe");
    }
    assert_eq!(bus.publish("metrics", StreamType::String, b"x"), 3);
    assert_eq!(
        *log.lock().expect("order log"),
        vec!["third", "second", "first"]
    );
}

#[rstest]
fn same_sink_and_context_subscribe_once(bus: StreamBus) {
    let (_, sink) = recording();
    bus.subscribe("s", Arc::clone(&sink), 7, DeliveryMode::Raw)
        .expect("first");
    let error = bus
        .subscribe("s", Arc::clone(&sink), 7, DeliveryMode::Raw)
        .expect_err("duplicate");
    assert!(matches!(error, StreamError::AlreadySubscribed { ref stream } if stream == "s"));
    assert_eq!(error.status(), crate::status::EEXIST);

    bus.subscribe("s", sink, 8, DeliveryMode::Raw)
        .expect("other context");
    assert_eq!(bus.subscriber_count("s"), 2);
}

#[rstest]
fn publishing_to_unknown_stream_delivers_nothing(bus: StreamBus) {
    assert_eq!(bus.publish("nobody", StreamType::String, b"lost"), 0);
    assert!(!bus.contains("nobody"));
}

#[rstest]
fn parsed_subscribers_receive_the_document(bus: StreamBus) {
    let (parsed, parsed_sink) = recording();
    let (raw, raw_sink) = recording();
    bus.subscribe("j", parsed_sink, 1, DeliveryMode::Parsed)
        .expect("parsed");
    bus.subscribe("j", raw_sink, 2, DeliveryMode::Raw).expect("raw");

    assert_eq!(bus.publish("j", StreamType::Json, br#"{"a":1}"#), 2);
    let received = parsed.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received.first().and_then(|r| r.json.clone()), Some(json!({ "a": 1 })));
    assert_eq!(raw.received().first().map(|r| r.json.clone()), Some(None));
}

#[rstest]
fn malformed_json_skips_only_parsed_subscribers(bus: StreamBus) {
    let (parsed, parsed_sink) = recording();
    let (raw, raw_sink) = recording();
    bus.subscribe("j", parsed_sink, 1, DeliveryMode::Parsed)
        .expect("parsed");
    bus.subscribe("j", raw_sink, 2, DeliveryMode::Raw).expect("raw");

    assert_eq!(bus.publish("j", StreamType::Json, b"{not json"), 1);
    assert!(parsed.received().is_empty());
    assert_eq!(raw.payloads(), vec!["{not json"]);
}

#[rstest]
fn string_payloads_are_never_parsed(bus: StreamBus) {
    let (parsed, sink) = recording();
    bus.subscribe("s", sink, 1, DeliveryMode::Parsed).expect("subscribe");
    bus.publish("s", StreamType::String, br#"{"a":1}"#);
    let received = parsed.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received.first().map(|r| r.json.clone()), Some(None));
}

#[rstest]
fn unsubscribe_keeps_the_stream(bus: StreamBus) {
    let (recorder, sink) = recording();
    let subscription = bus
        .subscribe("s", sink, 1, DeliveryMode::Raw)
        .expect("subscribe");
    assert!(bus.unsubscribe(&subscription));
    assert!(!bus.unsubscribe(&subscription));
    assert!(bus.contains("s"));
    assert_eq!(bus.publish("s", StreamType::String, b"x"), 0);
    assert!(recorder.received().is_empty());
}

#[rstest]
fn dump_reports_counters_and_clients(bus: StreamBus) {
    let (_, sink) = recording();
    bus.subscribe("s", sink, 4, DeliveryMode::Parsed)
        .expect("subscribe");
    bus.publish("s", StreamType::String, b"abc");
    bus.publish("s", StreamType::String, b"de");

    let dump = bus.dump();
    assert_eq!(dump["s"]["published"], json!(2));
    assert_eq!(dump["s"]["bytes"], json!(5));
    assert_eq!(dump["s"]["clients"][0]["ctxt"], json!(4));
    assert_eq!(dump["s"]["clients"][0]["mode"], json!("parsed"));
}

#[rstest]
fn remote_subscribers_receive_stream_messages(bus: StreamBus) {
    let remote = RemoteSubscribers::new(Arc::new(MessageNumbers::new()));
    let capture = Arc::new(CapturingTransport::new(64));
    let transport: Arc<dyn Transport> = capture.clone();

    remote.subscribe(&bus, "app", &transport).expect("subscribe");
    assert!(matches!(
        remote.subscribe(&bus, "app", &transport),
        Err(StreamError::AlreadySubscribed { .. })
    ));
    assert_eq!(remote.peer_count(), 1);

    let payload = vec![b'z'; 100];
    assert_eq!(bus.publish("app", StreamType::String, &payload), 1);
    assert!(capture.record_count() > 1);
    let messages = capture.stream_messages();
    assert_eq!(messages.len(), 1);
    let message = messages.first().expect("one message");
    assert_eq!(message.name, "app");
    assert_eq!(message.data, payload);
}

#[rstest]
fn releasing_a_connection_drops_its_subscriptions(bus: StreamBus) {
    let remote = RemoteSubscribers::new(Arc::new(MessageNumbers::new()));
    let transport: Arc<dyn Transport> = Arc::new(CapturingTransport::new(256));
    remote.subscribe(&bus, "a", &transport).expect("a");
    remote.subscribe(&bus, "b", &transport).expect("b");

    assert_eq!(remote.release(&bus, transport.connection_id()), 2);
    assert_eq!(remote.peer_count(), 0);
    assert_eq!(bus.subscriber_count("a"), 0);
    assert_eq!(remote.release(&bus, transport.connection_id()), 0);
}

#[rstest]
fn publications_to_a_vanished_peer_are_dropped(bus: StreamBus) {
    let remote = RemoteSubscribers::new(Arc::new(MessageNumbers::new()));
    let transport: Arc<dyn Transport> = Arc::new(CapturingTransport::new(256));
    remote.subscribe(&bus, "a", &transport).expect("subscribe");
    drop(transport);
    assert_eq!(bus.publish("a", StreamType::String, b"late"), 1);
}
