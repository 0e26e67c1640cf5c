use serde_json::Value;
use tracing::debug;

use super::{DISPATCH_TARGET, DispatchError, HandlerContext, HandlerOutcome};
use crate::reply::ItemResult;
use crate::status;
use crate::stream::StreamError;

/// `stream_subscribe`: republish the named streams to the requesting peer.
///
/// Every name is validated before any subscription is made. Subscribing
/// again to a stream the peer already receives is not an error.
pub(super) fn subscribe(handler: &HandlerContext<'_>) -> Result<HandlerOutcome, DispatchError> {
    let names = match handler.attr("stream_names") {
        None => {
            return Ok(HandlerOutcome::Reply(
                handler.error(status::EINVAL, "'stream_names' is missing."),
            ));
        }
        Some(Value::Array(names)) => names,
        Some(_) => {
            return Ok(HandlerOutcome::Reply(handler.error(
                status::EINVAL,
                "stream_subscribe: 'stream_names' must be a list.",
            )));
        }
    };
    let Some(names) = names.iter().map(Value::as_str).collect::<Option<Vec<_>>>() else {
        return Ok(HandlerOutcome::Reply(handler.error(
            status::EINVAL,
            "stream_subscribe: The elements of 'stream_names' must be a string.",
        )));
    };

    let transport = handler.context.transport();
    let mut reply = handler.reply();
    for name in names {
        let item = match handler.engine.subscribe_remote(name, transport) {
            Ok(()) => ItemResult::ok(),
            Err(StreamError::AlreadySubscribed { .. }) => {
                debug!(target: DISPATCH_TARGET, stream = name, "peer already subscribed");
                ItemResult::ok()
            }
            Err(error) => ItemResult::failed(error.status(), Some(error.to_string())),
        };
        reply.insert_result(name, item);
    }
    Ok(HandlerOutcome::Reply(reply))
}
