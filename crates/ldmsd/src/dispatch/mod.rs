//! Request dispatch.
//!
//! A completed request is parsed once, its `request` attribute resolved in
//! a name-sorted handler table, and the caller's credentials checked
//! against the entry's permission bits. The handler either returns the
//! reply, which is sent on the request's key, or reports that it kept a
//! reference to the context and will answer later.

mod cfgobj;
mod diagnostics;
mod errors;
mod route;
mod stream;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::context::ContextRef;
use crate::engine::Engine;
use crate::reply::Reply;
use crate::status;
use crate::transport::SecurityContext;

pub use self::errors::DispatchError;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Owner may execute.
pub const PERM_USER: u32 = 0o100;
/// Group may execute.
pub const PERM_GROUP: u32 = 0o010;
/// Others may execute.
pub const PERM_OTHER: u32 = 0o001;
/// Owner and group may execute.
pub const XUG: u32 = PERM_USER | PERM_GROUP;
/// Everyone may execute.
pub const XALL: u32 = XUG | PERM_OTHER;

const PARSE_FAILED: &str = "Failed to parse a JSON object string";

/// What a handler produced.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// Reply to send now.
    Reply(Reply),
    /// The handler retained the context and replies asynchronously.
    InProgress,
}

/// Everything a handler sees about the request it serves.
pub(crate) struct HandlerContext<'a> {
    pub(crate) engine: &'a Engine,
    pub(crate) context: &'a ContextRef,
    pub(crate) name: &'a str,
    pub(crate) request: &'a Map<String, Value>,
    pub(crate) security: SecurityContext,
    pub(crate) id: u32,
}

impl<'a> HandlerContext<'a> {
    /// Empty successful reply to this request.
    pub(crate) fn reply(&self) -> Reply {
        Reply::new(self.name, self.id)
    }

    /// Error reply to this request.
    pub(crate) fn error(&self, status: i32, msg: impl Into<String>) -> Reply {
        Reply::error(self.name, self.id, status, msg)
    }

    pub(crate) fn attr(&self, name: &str) -> Option<&'a Value> {
        self.request.get(name)
    }
}

type Handler = fn(&HandlerContext<'_>) -> Result<HandlerOutcome, DispatchError>;

/// One dispatchable request name.
pub(crate) struct HandlerEntry {
    pub(crate) name: &'static str,
    pub(crate) handler: Handler,
    pub(crate) mode: u32,
}

/// Handlers by request name; must stay sorted for the binary search.
pub(crate) const HANDLERS: &[HandlerEntry] = &[
    HandlerEntry {
        name: "create",
        handler: cfgobj::create,
        mode: XUG,
    },
    HandlerEntry {
        name: "delete",
        handler: cfgobj::delete,
        mode: XUG,
    },
    HandlerEntry {
        name: "export",
        handler: cfgobj::export,
        mode: XUG,
    },
    HandlerEntry {
        name: "query",
        handler: cfgobj::query,
        mode: XALL,
    },
    HandlerEntry {
        name: "set_route",
        handler: route::set_route,
        mode: XALL,
    },
    HandlerEntry {
        name: "stream_subscribe",
        handler: stream::subscribe,
        mode: XUG,
    },
    HandlerEntry {
        name: "test_protocol",
        handler: diagnostics::test_protocol,
        mode: XUG,
    },
    HandlerEntry {
        name: "update",
        handler: cfgobj::update,
        mode: XUG,
    },
    HandlerEntry {
        name: "version",
        handler: diagnostics::version,
        mode: XALL,
    },
];

pub(crate) fn lookup(name: &str) -> Option<&'static HandlerEntry> {
    HANDLERS
        .binary_search_by(|entry| entry.name.cmp(name))
        .ok()
        .and_then(|index| HANDLERS.get(index))
}

/// Whether `requester` may run a handler with `mode` on a daemon running
/// as `daemon`.
#[must_use]
pub const fn access_allowed(mode: u32, requester: SecurityContext, daemon: SecurityContext) -> bool {
    if requester.is_root() {
        return true;
    }
    if requester.uid == daemon.uid {
        return mode & PERM_USER != 0;
    }
    if requester.gid == daemon.gid {
        return mode & PERM_GROUP != 0;
    }
    mode & PERM_OTHER != 0
}

/// Runs the request held by `context` and sends its reply.
pub(crate) fn process(engine: &Engine, context: &ContextRef) {
    let msg_no = context.key().msg_no;
    let document = match context.document() {
        Ok(Value::Object(document)) => document,
        Ok(_) | Err(_) => {
            warn!(target: DISPATCH_TARGET, key = %context.key(), "request is not a JSON object");
            send(context, &Reply::error("", msg_no, status::EINVAL, PARSE_FAILED));
            return;
        }
    };
    let name = match document.get("request") {
        Some(Value::String(name)) => name.as_str(),
        Some(_) => {
            let msg = "The 'request' attribute value is not a JSON string.";
            send(context, &Reply::error("error", msg_no, status::EINVAL, msg));
            return;
        }
        None => {
            let msg = "The 'request' attribute is missing.";
            send(context, &Reply::error("error", msg_no, status::EINVAL, msg));
            return;
        }
    };
    let id = document
        .get("id")
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .unwrap_or(msg_no);

    let Some(entry) = lookup(name) else {
        let msg = format!("Request '{name}' not supported.");
        send(context, &Reply::error(name, id, status::ENOTSUP, msg));
        return;
    };

    let security = context.security_context();
    if !access_allowed(entry.mode, security, engine.credentials()) {
        warn!(
            target: DISPATCH_TARGET,
            request = name,
            uid = security.uid,
            gid = security.gid,
            "permission denied"
        );
        send(context, &Reply::error(name, id, status::EACCES, "Permission denied."));
        return;
    }

    let handler_context = HandlerContext {
        engine,
        context,
        name,
        request: document,
        security,
        id,
    };
    debug!(target: DISPATCH_TARGET, request = name, key = %context.key(), "dispatching");
    match (entry.handler)(&handler_context) {
        Ok(HandlerOutcome::Reply(reply)) => send(context, &reply),
        Ok(HandlerOutcome::InProgress) => {
            debug!(target: DISPATCH_TARGET, request = name, key = %context.key(), "reply deferred");
        }
        Err(failure) => error!(
            target: DISPATCH_TARGET,
            request = name,
            key = %context.key(),
            status = failure.status(),
            error = %failure,
            "handler failed"
        ),
    }
}

fn send(context: &ContextRef, reply: &Reply) {
    if let Err(failure) = context.send_reply(reply) {
        warn!(
            target: DISPATCH_TARGET,
            key = %context.key(),
            error = %failure,
            "failed to send reply"
        );
    }
}

/// Reads an optional boolean attribute.
pub(crate) fn optional_bool(
    handler: &HandlerContext<'_>,
    name: &str,
) -> Result<Option<bool>, Reply> {
    match handler.attr(name) {
        None => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(handler.error(status::EINVAL, format!("'{name}' must be a boolean."))),
    }
}

/// Reads an optional integer attribute.
pub(crate) fn optional_int(
    attrs: &Map<String, Value>,
    name: &str,
) -> Result<Option<i64>, String> {
    match attrs.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| format!("'{name}' must be an integer.")),
    }
}

/// Reads an optional object attribute.
pub(crate) fn optional_object<'a>(
    handler: &HandlerContext<'a>,
    name: &str,
) -> Result<Option<&'a Map<String, Value>>, Reply> {
    match handler.attr(name) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(handler.error(status::EINVAL, format!("'{name}' must be a dictionary."))),
    }
}
