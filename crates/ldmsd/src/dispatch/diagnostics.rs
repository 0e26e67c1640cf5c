//! `version` and the `test_protocol` exercises.

use ldmsd_wire::HEADER_LEN;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{DISPATCH_TARGET, DispatchError, HandlerContext, HandlerOutcome, optional_int};
use crate::forward::{self, ForwardKind, ForwardState};
use crate::reply::Reply;
use crate::status;

/// Hop budget of a `forward` request that names none.
pub const DEFAULT_NUM_HOPS: i64 = 127;

type Outcome = Result<HandlerOutcome, DispatchError>;

fn reply(reply: Reply) -> Outcome {
    Ok(HandlerOutcome::Reply(reply))
}

pub(super) fn version(handler: &HandlerContext<'_>) -> Outcome {
    let mut version = handler.reply();
    version.insert_result("LDMS Version", format!("{}.0", ldmsd_wire::VERSION));
    version.insert_result("LDMSD Version", format!("{}.0", env!("CARGO_PKG_VERSION")));
    reply(version)
}

pub(super) fn test_protocol(handler: &HandlerContext<'_>) -> Outcome {
    let mode = match handler.attr("mode") {
        None => return reply(handler.error(status::EINVAL, "'mode' is missing.")),
        Some(Value::String(mode)) => mode.as_str(),
        Some(_) => return reply(handler.error(status::EINVAL, "'mode' must be a string.")),
    };
    match mode {
        "echo" => reply(echo(handler)),
        "long_rsp" => reply(long_response(handler)),
        "multi_rec_rsp" => reply(multi_record_response(handler)),
        "forward" => forward_hops(handler),
        _ => reply(handler.error(status::ENOTSUP, "Not supported mode")),
    }
}

fn echo(handler: &HandlerContext<'_>) -> Reply {
    match handler.attr("list") {
        None => handler.error(status::EINVAL, "'list' is required for mode 'echo'."),
        Some(list @ Value::Array(_)) => {
            let mut echo = handler.reply();
            echo.set_attr("echo", list.clone());
            echo
        }
        Some(_) => handler.error(status::EINVAL, "'list' must be a list."),
    }
}

/// Reply for a `test_protocol` exercise asking for more than one
/// reassembled message may hold.
fn too_large(handler: &HandlerContext<'_>, limit: usize) -> Reply {
    handler.error(
        status::ENOMEM,
        format!("The requested reply exceeds the maximum message size '{limit}'."),
    )
}

/// Pads `str` so that the reply occupies `length` bytes on the wire,
/// header included.
///
/// The string starts with `(header+base+padding)` describing the sizes
/// used. When `length` is too small to hold the reply, `str` carries the
/// (non-positive) shortfall instead.
fn long_response(handler: &HandlerContext<'_>) -> Reply {
    let length = match handler.attr("length") {
        None => return handler.error(status::EINVAL, "'length' is missing."),
        Some(value) => match value.as_i64() {
            Some(length) => length,
            None => return handler.error(status::EINVAL, "'length' must be an integer."),
        },
    };
    let limit = handler.engine.reassembler().max_message();
    if usize::try_from(length).is_ok_and(|length| length > limit) {
        return too_large(handler, limit);
    }

    let mut long = handler.reply();
    long.set_attr("length", length);
    long.set_attr("str", "");
    let base = long.to_bytes().map_or(0, |bytes| bytes.len());
    let header = i64::try_from(HEADER_LEN).unwrap_or(i64::MAX);
    let base_len = i64::try_from(base).unwrap_or(i64::MAX);
    let msg_sz = length.saturating_sub(header.saturating_add(base_len));

    let filler = if msg_sz <= 0 {
        msg_sz.to_string()
    } else {
        let prefix = format!("({header}+{base_len}+{msg_sz})");
        let wanted = usize::try_from(msg_sz).unwrap_or(0);
        let zeros = wanted.saturating_sub(prefix.len()).max(1);
        format!("{prefix}{}", "0".repeat(zeros))
    };
    long.set_attr("str", filler);
    long
}

/// Builds a `records` list sized so the reply spans `num_records` records
/// of the requesting transport.
fn multi_record_response(handler: &HandlerContext<'_>) -> Reply {
    let count = match optional_int(handler.request, "num_records") {
        Ok(Some(count)) => count,
        Ok(None) => return handler.error(status::EINVAL, "'num_records' is required."),
        Err(msg) => return handler.error(status::EINVAL, msg),
    };
    let count = usize::try_from(count).unwrap_or(0);

    let mut multi = handler.reply();
    multi.set_attr("records", Value::Array(Vec::new()));
    if count == 0 {
        return multi;
    }
    let limit = handler.engine.reassembler().max_message();
    let record_size = handler.context.transport().max_message_size();
    let payload_per_record = record_size.saturating_sub(HEADER_LEN);
    let base = multi.to_bytes().map_or(0, |bytes| bytes.len());
    let fits = record_size
        .checked_mul(count)
        .is_some_and(|total| total <= limit && count <= limit);
    // Two quotes per element and a comma between consecutive elements.
    let overhead = count.checked_mul(3).and_then(|quoted| quoted.checked_add(base));
    let (true, Some(overhead)) = (fits, overhead) else {
        return too_large(handler, limit);
    };
    let content = (payload_per_record * count).saturating_sub(overhead - 1);
    let share = content / count;
    let last_share = content - share * (count - 1);

    let records: Vec<Value> = (1..=count)
        .map(|index| {
            let width = if index == count { last_share } else { share };
            Value::from(format!("{:<width$}", format!("rec_{index}")))
        })
        .collect();
    multi.set_attr("records", Value::Array(records));
    multi
}

/// Records this daemon as one hop, then passes the request on to the
/// first attached producer while hops remain.
fn forward_hops(handler: &HandlerContext<'_>) -> Outcome {
    let num_hops = match optional_int(handler.request, "num_hops") {
        Ok(value) => value.unwrap_or(DEFAULT_NUM_HOPS),
        Err(msg) => return reply(handler.error(status::EINVAL, msg)),
    };
    let hop_id = match optional_int(handler.request, "hop_id") {
        Ok(value) => value.unwrap_or(0),
        Err(msg) => return reply(handler.error(status::EINVAL, msg)),
    };

    let Some(next_hop_id) = hop_id.checked_add(1) else {
        return reply(handler.error(status::EINVAL, "'hop_id' is out of range."));
    };

    let mut hops = Map::new();
    hops.insert(hop_id.to_string(), Value::from(handler.engine.name()));
    let mut diagnostic = handler.reply();
    diagnostic.set_attr("hops", Value::Object(hops));

    if num_hops <= 0 {
        return reply(diagnostic);
    }
    let Some((producer, link)) = handler.engine.topology().first_link() else {
        return reply(diagnostic);
    };

    let request = json!({
        "request": "test_protocol",
        "mode": "forward",
        "num_hops": num_hops - 1,
        "hop_id": next_hop_id,
    });
    let Value::Object(request) = request else {
        return Err(DispatchError::internal("forward request is not an object"));
    };
    debug!(
        target: DISPATCH_TARGET,
        producer = %producer,
        num_hops,
        hop_id,
        "forwarding test_protocol"
    );
    let state = ForwardState::new(handler.context.clone(), diagnostic, ForwardKind::HopDiagnostic);
    if let Err((error, state)) = forward::send_request(handler.engine, &link, request, state) {
        forward::fail(state, &error);
    }
    Ok(HandlerOutcome::InProgress)
}
