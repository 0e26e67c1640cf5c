//! Record framing over accepted sockets.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ldmsd_wire::{HEADER_LEN, RecordHeader};
use tracing::{debug, warn};

use super::{
    ConnectionHandler, ConnectionStream, SecurityContext, TRANSPORT_TARGET, Transport,
    TransportError, next_connection_id,
};
use crate::engine::Engine;

/// Transport writing records to an accepted socket.
#[derive(Debug)]
pub struct SocketTransport {
    id: u64,
    writer: Mutex<ConnectionStream>,
    max_record: usize,
    security: SecurityContext,
    closed: AtomicBool,
}

impl SocketTransport {
    pub(crate) fn new(
        writer: ConnectionStream,
        max_record: usize,
        security: SecurityContext,
    ) -> Self {
        Self {
            id: next_connection_id(),
            writer: Mutex::new(writer),
            max_record,
            security,
            closed: AtomicBool::new(false),
        }
    }

    /// Marks the connection closed; later sends fail with `Closed`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(error) = writer.shutdown()
                && error.kind() != io::ErrorKind::NotConnected
            {
                debug!(target: TRANSPORT_TARGET, error = %error, "socket shutdown failed");
            }
        }
    }
}

impl Transport for SocketTransport {
    fn send(&self, record: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed {
                connection: self.id,
            });
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(record)?;
        writer.flush()?;
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

/// Reads framed records from each connection and feeds them to the engine.
pub struct RecordConnectionHandler {
    engine: Arc<Engine>,
    max_record: usize,
}

impl RecordConnectionHandler {
    /// Builds a handler that accepts records up to `max_record` bytes.
    #[must_use]
    pub fn new(engine: Arc<Engine>, max_record: usize) -> Self {
        Self { engine, max_record }
    }
}

impl ConnectionHandler for RecordConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        let writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(error) => {
                warn!(target: TRANSPORT_TARGET, error = %error, "failed to clone connection");
                return;
            }
        };
        let security = match stream.peer_security() {
            Ok(security) => security,
            Err(error) => {
                warn!(
                    target: TRANSPORT_TARGET,
                    peer = %stream.peer(),
                    error = %error,
                    "refusing connection without peer credentials"
                );
                return;
            }
        };
        let socket = Arc::new(SocketTransport::new(writer, self.max_record, security));
        let transport: Arc<dyn Transport> = socket.clone();
        let connection = transport.connection_id();
        debug!(
            target: TRANSPORT_TARGET,
            connection,
            peer = %stream.peer(),
            uid = security.uid,
            gid = security.gid,
            "connection opened"
        );

        let mut reader = stream;
        let mut buffer = Vec::with_capacity(self.max_record);
        loop {
            match read_frame(&mut reader, self.max_record, &mut buffer) {
                Ok(Frame::Record) => self.engine.handle_record(&buffer, &transport),
                Ok(Frame::Oversized(header)) => self.engine.reject_oversized(&header, &transport),
                Ok(Frame::Closed) => break,
                Err(error) => {
                    warn!(
                        target: TRANSPORT_TARGET,
                        connection,
                        error = %error,
                        "dropping connection after read failure"
                    );
                    break;
                }
            }
        }

        socket.close();
        self.engine.release_connection(connection);
        debug!(target: TRANSPORT_TARGET, connection, "connection closed");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Record,
    Oversized(RecordHeader),
    Closed,
}

/// Reads one record into `buffer`.
///
/// A record longer than `max_record` is drained from the stream so the
/// connection stays in sync, and only its header is returned.
fn read_frame(
    reader: &mut impl Read,
    max_record: usize,
    buffer: &mut Vec<u8>,
) -> io::Result<Frame> {
    let mut header_bytes = [0_u8; HEADER_LEN];
    if !read_full(reader, &mut header_bytes)? {
        return Ok(Frame::Closed);
    }
    let header = RecordHeader::decode(&header_bytes)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;

    let payload_len = header.payload_len();
    if header.record_len() > max_record {
        let drained = io::copy(
            &mut (&mut *reader).take(u64::try_from(payload_len).unwrap_or(u64::MAX)),
            &mut io::sink(),
        )?;
        if usize::try_from(drained).ok() != Some(payload_len) {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        return Ok(Frame::Oversized(header));
    }

    buffer.clear();
    buffer.extend_from_slice(&header_bytes);
    buffer.resize(HEADER_LEN + payload_len, 0);
    let payload = buffer
        .get_mut(HEADER_LEN..)
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidData))?;
    reader.read_exact(payload)?;
    Ok(Frame::Record)
}

/// Fills `buf` completely; `Ok(false)` on a clean end of stream before the
/// first byte.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let Some(rest) = buf.get_mut(filled..) else {
            break;
        };
        match reader.read(rest) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(true)
}
