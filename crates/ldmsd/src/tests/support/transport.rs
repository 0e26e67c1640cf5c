//! In-memory transport that records everything an engine sends, plus a
//! client driving requests into an engine through it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ldmsd_wire::{
    CorrelationKey, MessageNumbers, MessageType, Record, RecordWriter, StreamMessage, WireError,
};
use serde_json::Value;

use crate::engine::Engine;
use crate::status;
use crate::transport::{SecurityContext, Transport, TransportError, next_connection_id};

/// Transport capturing each record sent through it.
#[derive(Debug)]
pub struct CapturingTransport {
    id: u64,
    max_record: usize,
    security: SecurityContext,
    records: Mutex<Vec<Vec<u8>>>,
    failure: Mutex<i32>,
}

impl CapturingTransport {
    pub fn new(max_record: usize) -> Self {
        Self::with_security(max_record, SecurityContext::current())
    }

    pub fn with_security(max_record: usize, security: SecurityContext) -> Self {
        Self {
            id: next_connection_id(),
            max_record,
            security,
            records: Mutex::new(Vec::new()),
            failure: Mutex::new(status::OK),
        }
    }

    /// Makes later sends fail with `status`; `0` restores delivery.
    pub fn fail_sends(&self, status: i32) {
        *self.failure.lock().expect("failure lock") = status;
    }

    pub fn records(&self) -> Vec<Vec<u8>> {
        self.records.lock().expect("records lock").clone()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().expect("records lock").len()
    }

    pub fn clear(&self) {
        self.records.lock().expect("records lock").clear();
    }

    /// Reassembles the captured records of `msg_type` into complete
    /// messages, in completion order.
    pub fn messages(&self, msg_type: MessageType) -> Vec<(CorrelationKey, Vec<u8>)> {
        let mut pending: HashMap<u32, Vec<u8>> = HashMap::new();
        let mut complete = Vec::new();
        for bytes in self.records() {
            let record = Record::parse(&bytes).expect("captured record parses");
            if record.header.msg_type != msg_type {
                continue;
            }
            let msg_no = record.header.key.msg_no;
            if record.header.flags.is_start() {
                pending.insert(msg_no, Vec::new());
            }
            pending
                .get_mut(&msg_no)
                .expect("continuation follows a start record")
                .extend_from_slice(record.payload);
            if record.header.flags.is_end() {
                let payload = pending.remove(&msg_no).expect("pending message");
                complete.push((record.header.key, payload));
            }
        }
        complete
    }

    /// Every reply document sent so far.
    pub fn replies(&self) -> Vec<Value> {
        self.messages(MessageType::Response)
            .into_iter()
            .map(|(_, payload)| serde_json::from_slice(&payload).expect("reply is JSON"))
            .collect()
    }

    /// The most recent reply document.
    pub fn last_reply(&self) -> Value {
        self.replies().pop().expect("a reply was sent")
    }

    /// Every stream publication sent so far.
    pub fn stream_messages(&self) -> Vec<StreamMessage> {
        self.messages(MessageType::Stream)
            .into_iter()
            .map(|(_, payload)| StreamMessage::decode(&payload).expect("stream message decodes"))
            .collect()
    }
}

impl Transport for CapturingTransport {
    fn send(&self, record: &[u8]) -> Result<(), TransportError> {
        let failure = *self.failure.lock().expect("failure lock");
        if failure != status::OK {
            return Err(TransportError::Rejected { status: failure });
        }
        self.records.lock().expect("records lock").push(record.to_vec());
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

/// Encodes `payload` into records of at most `max_record` bytes.
pub fn encode_records(
    msg_type: MessageType,
    msg_no: u32,
    payload: &[u8],
    max_record: usize,
) -> Vec<Vec<u8>> {
    let mut writer = RecordWriter::new(max_record).expect("writer");
    let mut records = Vec::new();
    writer
        .write_message(msg_type, CorrelationKey::new(0, msg_no), payload, |bytes| {
            records.push(bytes.to_vec());
            Ok::<(), WireError>(())
        })
        .expect("encode records");
    records
}

/// A peer talking to one engine over a capturing transport.
pub struct Client {
    pub engine: Arc<Engine>,
    pub capture: Arc<CapturingTransport>,
    transport: Arc<dyn Transport>,
    msg_numbers: MessageNumbers,
}

impl Client {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self::with_transport(engine, CapturingTransport::new(1024))
    }

    pub fn with_transport(engine: Arc<Engine>, capture: CapturingTransport) -> Self {
        let capture = Arc::new(capture);
        let transport: Arc<dyn Transport> = capture.clone();
        Self {
            engine,
            capture,
            transport,
            msg_numbers: MessageNumbers::new(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn next_msg_no(&self) -> u32 {
        self.msg_numbers.next_msg_no()
    }

    /// Feeds raw bytes to the engine as one record.
    pub fn feed(&self, bytes: &[u8]) {
        self.engine.handle_record(bytes, &self.transport);
    }

    /// Sends `payload` as a message of `msg_type`, chunked to the transport
    /// maximum.
    pub fn send(&self, msg_type: MessageType, msg_no: u32, payload: &[u8]) {
        for record in encode_records(msg_type, msg_no, payload, self.capture.max_message_size()) {
            self.feed(&record);
        }
    }

    /// Sends a request document and returns the reply it produced.
    pub fn request(&self, document: &Value) -> Value {
        self.capture.clear();
        let payload = serde_json::to_vec(document).expect("serialize request");
        self.send(MessageType::Request, self.next_msg_no(), &payload);
        self.capture.last_reply()
    }
}
