use serde_json::{Map, Value, json};

use super::{DispatchError, HandlerContext, HandlerOutcome, optional_int};
use crate::forward::{self, FORWARD_FAILED, ForwardKind, ForwardState};
use crate::reply::Reply;
use crate::status;
use crate::topology::SetOrigin;

type Outcome = Result<HandlerOutcome, DispatchError>;

/// `set_route`: describes how a set instance reaches this daemon.
///
/// Each daemon adds one entry keyed by its hop number. A set aggregated
/// from a producer sends the request on to that producer with the next
/// hop number; the reply goes out once the producer answers.
pub(super) fn set_route(handler: &HandlerContext<'_>) -> Outcome {
    let spec = match handler.attr("spec") {
        Some(Value::Object(spec)) => spec,
        Some(_) | None => {
            return Ok(HandlerOutcome::Reply(
                handler.error(status::EINVAL, "'spec' is missing."),
            ));
        }
    };
    let instance = match spec.get("instance") {
        None => {
            let msg = "'instance' is missing from 'spec'.";
            return Ok(HandlerOutcome::Reply(handler.error(status::EINVAL, msg)));
        }
        Some(Value::String(instance)) => instance.as_str(),
        Some(_) => {
            let msg = "'instance' must be the JSON string of a set instance name";
            return Ok(HandlerOutcome::Reply(handler.error(status::EINVAL, msg)));
        }
    };
    let hop = match optional_int(spec, "hop") {
        Ok(hop) => hop.unwrap_or(0),
        Err(_) => {
            let msg = "'hop' must be an integer.";
            return Ok(HandlerOutcome::Reply(handler.error(status::EINVAL, msg)));
        }
    };

    let engine = handler.engine;
    let hop_key = hop.to_string();
    let mut reply = handler.reply();
    if hop == 0 {
        reply.insert_result("instance", instance);
    }

    let Some(entry) = engine.sets().get(instance) else {
        reply.insert_result(
            hop_key,
            json!({ "name": engine.name(), "msg": "The set does not exist." }),
        );
        reply.set_status(status::ENOENT);
        return Ok(HandlerOutcome::Reply(reply));
    };
    if hop == 0 {
        reply.insert_result("schema", entry.schema.as_str());
    }

    match entry.origin {
        SetOrigin::Sampler(plugin) => {
            reply.insert_result(
                hop_key,
                json!({ "name": engine.name(), "type": "sampled set", "plugin": plugin }),
            );
            Ok(HandlerOutcome::Reply(reply))
        }
        SetOrigin::Producer(producer) => {
            reply.insert_result(
                hop_key,
                json!({ "name": engine.name(), "type": "aggregated set", "producer": producer }),
            );
            Ok(forward_to_producer(handler, &producer, instance, hop, reply))
        }
    }
}

fn forward_to_producer(
    handler: &HandlerContext<'_>,
    producer: &str,
    instance: &str,
    hop: i64,
    mut reply: Reply,
) -> HandlerOutcome {
    let Some(link) = handler.engine.topology().link(producer) else {
        reply.set_error(status::ENOTCONN, FORWARD_FAILED);
        return HandlerOutcome::Reply(reply);
    };
    let Some(next_hop) = hop.checked_add(1) else {
        reply.set_error(status::EINVAL, "'hop' is out of range.");
        return HandlerOutcome::Reply(reply);
    };
    let mut spec = Map::new();
    spec.insert("instance".into(), Value::from(instance));
    spec.insert("hop".into(), Value::from(next_hop));
    let mut request = Map::new();
    request.insert("request".into(), Value::from("set_route"));
    request.insert("spec".into(), Value::Object(spec));

    let state = ForwardState::new(handler.context.clone(), reply, ForwardKind::SetRoute);
    if let Err((error, state)) = forward::send_request(handler.engine, &link, request, state) {
        forward::fail(state, &error);
    }
    HandlerOutcome::InProgress
}
