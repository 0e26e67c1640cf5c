//! Nested requests and the continuations that resume their callers.
//!
//! A forwarding handler pre-registers the response context of the nested
//! request, parks a [`ForwardState`] in it and sends the request. The state
//! holds a counted reference to the original request, so the caller's
//! context stays alive until the nested response arrives, the send fails,
//! or the link is torn down. Each of those paths sends exactly one reply.

use std::sync::Arc;

use ldmsd_wire::{CorrelationKey, MessageType};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::{ContextRef, RequestPhase};
use crate::dispatch::DispatchError;
use crate::engine::Engine;
use crate::reassembly::ReassemblyError;
use crate::reply::Reply;
use crate::status;
use crate::transport::Transport;

const FORWARD_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::forward");

/// Message added to a reply whose nested request could not be sent.
pub const FORWARD_FAILED: &str = "Failed to forward the request.";

/// How a nested response is folded into the caller's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardKind {
    /// Merge the `hops` attribute.
    HopDiagnostic,
    /// Merge the per-hop `result` entries.
    SetRoute,
}

/// Continuation parked in the response context of a nested request.
#[derive(Debug)]
pub struct ForwardState {
    client: ContextRef,
    reply: Reply,
    kind: ForwardKind,
}

impl ForwardState {
    /// Continuation answering `client` with `reply` once resumed.
    #[must_use]
    pub const fn new(client: ContextRef, reply: Reply, kind: ForwardKind) -> Self {
        Self {
            client,
            reply,
            kind,
        }
    }

    /// Context of the original request.
    #[must_use]
    pub const fn client(&self) -> &ContextRef {
        &self.client
    }

    /// Reply accumulated so far.
    #[must_use]
    pub const fn reply(&self) -> &Reply {
        &self.reply
    }

    /// Folding rule.
    #[must_use]
    pub const fn kind(&self) -> ForwardKind {
        self.kind
    }

    /// Gives the accumulated reply back, dropping the client reference.
    #[must_use]
    pub fn into_reply(self) -> Reply {
        self.reply
    }
}

/// Reasons a nested request could not be issued.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The response context could not be registered.
    #[error("failed to register the nested response: {0}")]
    Register(#[from] ReassemblyError),
    /// The request could not be encoded or sent.
    #[error("failed to send the nested request: {0}")]
    Send(#[from] DispatchError),
}

impl ForwardError {
    /// Status embedded in the caller's reply.
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::Register(error) => error.status(),
            Self::Send(error) => error.status(),
        }
    }
}

/// Sends `request` over `link` and parks `state` until the response.
///
/// The request's `id` is set to the nested message number. On failure the
/// response context is removed again and the state is handed back so the
/// caller can still answer its client.
///
/// # Errors
///
/// Returns the failure together with the unused continuation.
pub fn send_request(
    engine: &Engine,
    link: &Arc<dyn Transport>,
    mut request: Map<String, Value>,
    state: ForwardState,
) -> Result<(), (ForwardError, ForwardState)> {
    let msg_no = engine.next_msg_no();
    request.insert("id".into(), Value::from(msg_no));
    let payload = match serde_json::to_vec(&Value::Object(request)) {
        Ok(payload) => payload,
        Err(error) => return Err((ForwardError::Send(error.into()), state)),
    };

    let key = CorrelationKey::new(link.connection_id(), msg_no);
    let pending = match engine.reassembler().register_response(key, link) {
        Ok(pending) => pending,
        Err(error) => return Err((error.into(), state)),
    };
    state.client.set_phase(RequestPhase::AwaitingNested);
    let client_key = state.client.key();
    pending.set_continuation(state);
    debug!(target: FORWARD_TARGET, client = %client_key, nested = %key, "forwarding request");

    // The peer may answer before `send` returns; the continuation is
    // already parked, and nothing here holds an index lock.
    match pending.send(MessageType::Request, &payload) {
        Ok(_) => Ok(()),
        Err(error) => {
            let recovered = pending.take_continuation();
            drop(engine.reassembler().evict(pending));
            match recovered {
                Some(state) => {
                    state.client.set_phase(RequestPhase::AwaitingLocal);
                    Err((error.into(), state))
                }
                // The response raced the failure and already answered.
                None => Ok(()),
            }
        }
    }
}

/// Answers the client with the accumulated reply plus a forwarding error.
pub fn fail(state: ForwardState, error: &ForwardError) {
    warn!(
        target: FORWARD_TARGET,
        client = %state.client.key(),
        error = %error,
        "forwarding failed"
    );
    let ForwardState {
        client, mut reply, ..
    } = state;
    reply.set_error(error.status(), FORWARD_FAILED);
    respond(&client, &reply);
}

/// Folds a nested response into the accumulated reply and answers the
/// client.
///
/// `nested` is the parsed response document, or the parse error text.
pub fn complete(state: ForwardState, nested: Result<&Value, &str>) {
    let ForwardState {
        client,
        mut reply,
        kind,
    } = state;
    match nested.map(Reply::from_value) {
        Ok(Some(response)) => merge(&mut reply, kind, &response),
        Ok(None) | Err(_) => {
            warn!(target: FORWARD_TARGET, client = %client.key(), "unreadable nested response");
            reply.set_error(status::EINVAL, "The forwarded request returned a malformed reply.");
        }
    }
    respond(&client, &reply);
}

/// Answers a client whose nested request will never be answered.
///
/// `status` is usually `ENOTCONN` for a torn-down link.
pub fn abandon(state: ForwardState, status: i32) {
    let ForwardState {
        client, mut reply, ..
    } = state;
    debug!(target: FORWARD_TARGET, client = %client.key(), status, "nested request abandoned");
    reply.set_error(status, FORWARD_FAILED);
    respond(&client, &reply);
}

fn merge(reply: &mut Reply, kind: ForwardKind, response: &Reply) {
    match kind {
        ForwardKind::HopDiagnostic => {
            if let (Some(Value::Object(hops)), Some(Value::Object(nested))) =
                (reply.attr_mut("hops"), response.attr("hops"))
            {
                for (hop, name) in nested {
                    hops.insert(hop.clone(), name.clone());
                }
            }
            if response.status() != status::OK {
                reply.set_status(response.status());
            }
        }
        ForwardKind::SetRoute => {
            for (hop, entry) in response.result() {
                reply.insert_result(hop.clone(), entry.clone());
            }
            reply.set_status(response.status());
        }
    }
    if let Some(msg) = response.msg() {
        reply.set_error(response.status(), msg);
    }
}

fn respond(client: &ContextRef, reply: &Reply) {
    if let Err(error) = client.send_reply(reply) {
        warn!(
            target: FORWARD_TARGET,
            client = %client.key(),
            error = %error,
            "failed to deliver forwarded reply"
        );
    }
}
