//! `create`, `update`, `delete`, `query` and `export`.
//!
//! Objects are selected by name (`spec` or `key`) or by regular expression
//! (`re`). Every selected object yields one entry in `result`; a bad regular
//! expression stops the batch but keeps the entries already produced.

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::{
    DISPATCH_TARGET, DispatchError, HandlerContext, HandlerOutcome, optional_bool, optional_object,
};
use crate::cfgobj::{CfgObjType, ConfigObject, ObjectSlot, RegistryError, Update};
use crate::locking::lock;
use crate::reply::{ItemResult, Reply};
use crate::status;

type Outcome = Result<HandlerOutcome, DispatchError>;

fn respond(result: Result<Reply, Reply>) -> Outcome {
    Ok(HandlerOutcome::Reply(result.unwrap_or_else(|reply| reply)))
}

fn schema(handler: &HandlerContext<'_>) -> Result<CfgObjType, Reply> {
    match handler.attr("schema") {
        None => Err(handler.error(status::EINVAL, "'schema' is missing.")),
        Some(Value::String(name)) => name.parse().map_err(|_| {
            handler.error(status::ENOTSUP, format!("Schema '{name}' not supported."))
        }),
        Some(_) => Err(handler.error(status::EINVAL, "'schema' must be a string.")),
    }
}

fn string_list<'a>(
    handler: &HandlerContext<'a>,
    name: &str,
) -> Result<Option<Vec<&'a str>>, Reply> {
    let invalid = || handler.error(status::EINVAL, format!("'{name}' must be a list of strings."));
    match handler.attr(name) {
        None => Ok(None),
        Some(Value::String(single)) => Ok(Some(vec![single.as_str()])),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(invalid))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid()),
    }
}

/// Resolves `re` into the matching objects, one pattern at a time.
///
/// Stops at the first pattern that fails to compile, recording the error
/// on `reply`; matches of earlier patterns are still returned.
fn select_by_patterns(
    handler: &HandlerContext<'_>,
    schema: CfgObjType,
    patterns: &[&str],
    reply: &mut Reply,
) -> Vec<(String, ObjectSlot)> {
    let mut selected = Vec::new();
    for pattern in patterns {
        match Regex::new(pattern) {
            Ok(regex) => selected.extend(handler.engine.objects().select(schema, &regex)),
            Err(error) => {
                warn!(target: DISPATCH_TARGET, pattern, error = %error, "invalid regular expression");
                reply.set_error(
                    status::EINVAL,
                    format!("Failed to compile regex '{pattern}'. {error}"),
                );
                break;
            }
        }
    }
    selected
}

pub(super) fn create(handler: &HandlerContext<'_>) -> Outcome {
    respond(create_reply(handler))
}

fn create_reply(handler: &HandlerContext<'_>) -> Result<Reply, Reply> {
    let schema = schema(handler)?;
    let Some(spec) = optional_object(handler, "spec")? else {
        return Err(handler.error(status::EINVAL, "The 'spec' attribute is missing."));
    };
    let defaults = optional_object(handler, "default")?;
    let enabled = optional_bool(handler, "enabled")?.unwrap_or(false);

    let mut reply = handler.reply();
    for (name, attrs) in spec {
        let item = match attrs {
            Value::Object(attrs) => {
                let mut merged = defaults.cloned().unwrap_or_default();
                merged.extend(attrs.iter().map(|(key, value)| (key.clone(), value.clone())));
                handler
                    .engine
                    .objects()
                    .create(schema, name, merged, enabled, handler.security)
                    .map_or_else(ItemResult::from, |()| ItemResult::ok())
            }
            _ => ItemResult::failed(
                status::EINVAL,
                Some(format!("The attributes of '{name}' must be a dictionary.")),
            ),
        };
        reply.insert_result(name.clone(), item);
    }
    Ok(reply)
}

pub(super) fn update(handler: &HandlerContext<'_>) -> Outcome {
    respond(update_reply(handler))
}

fn update_reply(handler: &HandlerContext<'_>) -> Result<Reply, Reply> {
    let schema = schema(handler)?;
    let enabled = optional_bool(handler, "enabled")?;
    let defaults = optional_object(handler, "default")?;
    let mut reply = handler.reply();

    if let Some(spec) = optional_object(handler, "spec")? {
        for (name, attrs) in spec {
            let Value::Object(attrs) = attrs else {
                let msg = format!("The attributes of '{name}' must be a dictionary.");
                reply.insert_result(name.clone(), ItemResult::failed(status::EINVAL, Some(msg)));
                continue;
            };
            let change = Update {
                enabled,
                defaults,
                attrs: Some(attrs),
            };
            let slot = handler.engine.objects().find(schema, name);
            let item = update_one(handler, schema, name, slot, &change);
            reply.insert_result(name.clone(), item);
        }
        return Ok(reply);
    }

    let Some(patterns) = string_list(handler, "re")? else {
        return Err(handler.error(status::EINVAL, "Either 'spec' or 're' must be given."));
    };
    let change = Update {
        enabled,
        defaults,
        attrs: None,
    };
    for (name, slot) in select_by_patterns(handler, schema, &patterns, &mut reply) {
        let item = update_one(handler, schema, &name, Some(slot), &change);
        reply.insert_result(name, item);
    }
    Ok(reply)
}

fn update_one(
    handler: &HandlerContext<'_>,
    schema: CfgObjType,
    name: &str,
    slot: Option<ObjectSlot>,
    change: &Update<'_>,
) -> ItemResult {
    let Some(slot) = slot else {
        return RegistryError::NotFound {
            schema,
            name: name.to_owned(),
        }
        .into();
    };
    let transition = {
        let mut object = lock(&slot);
        if object.header().removed {
            return RegistryError::NotFound {
                schema,
                name: name.to_owned(),
            }
            .into();
        }
        if !object.header().permits(handler.security) {
            warn!(target: DISPATCH_TARGET, schema = %schema, name, "update permission denied");
            return RegistryError::PermissionDenied {
                name: name.to_owned(),
            }
            .into();
        }
        let was_enabled = object.header().enabled;
        if let Err(error) = object.update(change) {
            return error.into();
        }
        let now_enabled = object.header().enabled;
        (was_enabled != now_enabled).then_some(now_enabled)
    };
    if let Some(enabled) = transition {
        handler.engine.object_state_changed(schema, name, enabled);
    }
    ItemResult::ok()
}

pub(super) fn delete(handler: &HandlerContext<'_>) -> Outcome {
    respond(delete_reply(handler))
}

fn delete_reply(handler: &HandlerContext<'_>) -> Result<Reply, Reply> {
    let schema = schema(handler)?;
    let mut reply = handler.reply();
    let names: Vec<String> = if let Some(keys) = string_list(handler, "key")? {
        keys.into_iter().map(str::to_owned).collect()
    } else if let Some(patterns) = string_list(handler, "re")? {
        select_by_patterns(handler, schema, &patterns, &mut reply)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    } else {
        return Err(handler.error(status::EINVAL, "Either 'key' or 're' must be given."));
    };

    for name in names {
        let item = match handler.engine.delete_object(schema, &name, handler.security) {
            Ok(()) => ItemResult::ok(),
            Err(error) => error.into(),
        };
        reply.insert_result(name, item);
    }
    Ok(reply)
}

pub(super) fn query(handler: &HandlerContext<'_>) -> Outcome {
    respond(describe_reply(handler, |object| object.query()))
}

pub(super) fn export(handler: &HandlerContext<'_>) -> Outcome {
    respond(describe_reply(handler, |object| object.export()))
}

fn describe_reply(
    handler: &HandlerContext<'_>,
    describe: impl Fn(&dyn ConfigObject) -> Value,
) -> Result<Reply, Reply> {
    let schema = schema(handler)?;
    let objects = handler.engine.objects();
    let mut reply = handler.reply();
    let selected: Vec<(String, Option<ObjectSlot>)> =
        if let Some(keys) = string_list(handler, "key")? {
            keys.into_iter()
                .map(|name| (name.to_owned(), objects.find(schema, name)))
                .collect()
        } else if let Some(patterns) = string_list(handler, "re")? {
            select_by_patterns(handler, schema, &patterns, &mut reply)
                .into_iter()
                .map(|(name, slot)| (name, Some(slot)))
                .collect()
        } else {
            objects
                .all(schema)
                .into_iter()
                .map(|(name, slot)| (name, Some(slot)))
                .collect()
        };

    for (name, slot) in selected {
        let value = slot.and_then(|slot| {
            let object = lock(&slot);
            (!object.header().removed).then(|| describe(object.as_ref()))
        });
        let item = match value {
            Some(value) => ItemResult::with_value(value),
            None => RegistryError::NotFound {
                schema,
                name: name.clone(),
            }
            .into(),
        };
        reply.insert_result(name, item);
    }
    Ok(reply)
}
