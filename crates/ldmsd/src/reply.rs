//! Reply documents returned to requesters.

use serde_json::{Map, Value, json};

use crate::status;

/// A reply under construction.
///
/// Serializes as `{reply, id, status, msg?, result, ...extra}` with keys in
/// that order; handler-specific top-level attributes follow `result`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    request: String,
    id: u32,
    status: i32,
    msg: Option<String>,
    result: Map<String, Value>,
    extra: Map<String, Value>,
}

impl Reply {
    /// Successful, empty reply to `request`.
    pub fn new(request: impl Into<String>, id: u32) -> Self {
        Self {
            request: request.into(),
            id,
            status: status::OK,
            msg: None,
            result: Map::new(),
            extra: Map::new(),
        }
    }

    /// Reply carrying only an error status and message.
    pub fn error(request: impl Into<String>, id: u32, status: i32, msg: impl Into<String>) -> Self {
        let mut reply = Self::new(request, id);
        reply.set_error(status, msg);
        reply
    }

    /// Name of the request being answered.
    #[must_use]
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Echoed message number.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Overall status.
    #[must_use]
    pub const fn status(&self) -> i32 {
        self.status
    }

    /// Explanatory message, if any.
    #[must_use]
    pub fn msg(&self) -> Option<&str> {
        self.msg.as_deref()
    }

    /// Per-object or per-hop results.
    #[must_use]
    pub const fn result(&self) -> &Map<String, Value> {
        &self.result
    }

    pub(crate) fn result_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.result
    }

    /// Sets the status and message together.
    pub fn set_error(&mut self, status: i32, msg: impl Into<String>) {
        self.status = status;
        self.msg = Some(msg.into());
    }

    /// Sets the status, leaving any message untouched.
    pub fn set_status(&mut self, status: i32) {
        self.status = status;
    }

    /// Adds or replaces one named result entry.
    pub fn insert_result(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.result.insert(name.into(), value.into());
    }

    /// Adds a top-level attribute outside `result`.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(name.into(), value.into());
    }

    /// Top-level attribute previously added with [`Reply::set_attr`].
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    pub(crate) fn attr_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.extra.get_mut(name)
    }

    /// Builds the JSON document.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut document = Map::new();
        document.insert("reply".into(), Value::from(self.request.as_str()));
        document.insert("id".into(), Value::from(self.id));
        document.insert("status".into(), Value::from(self.status));
        if let Some(msg) = &self.msg {
            document.insert("msg".into(), Value::from(msg.as_str()));
        }
        document.insert("result".into(), Value::Object(self.result.clone()));
        for (name, value) in &self.extra {
            document.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(document)
    }

    /// Serialized document bytes.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` serialization failures.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_value())
    }

    /// Reads a reply document received from a peer.
    ///
    /// Missing `id` or `status` default to zero; anything other than an
    /// object with a string `reply` is rejected.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let request = object.get("reply")?.as_str()?;
        let id = object
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
            .unwrap_or_default();
        let mut reply = Self::new(request, id);
        reply.status = object
            .get("status")
            .and_then(Value::as_i64)
            .and_then(|status| i32::try_from(status).ok())
            .unwrap_or_default();
        reply.msg = object.get("msg").and_then(Value::as_str).map(str::to_owned);
        if let Some(Value::Object(result)) = object.get("result") {
            reply.result = result.clone();
        }
        for (name, value) in object {
            if !matches!(name.as_str(), "reply" | "id" | "status" | "msg" | "result") {
                reply.extra.insert(name.clone(), value.clone());
            }
        }
        Some(reply)
    }
}

/// Outcome of one object inside a batch reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    status: i32,
    msg: Option<String>,
    value: Option<Value>,
}

impl ItemResult {
    /// Success without a value.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: status::OK,
            msg: None,
            value: None,
        }
    }

    /// Failure with an optional explanation.
    #[must_use]
    pub const fn failed(status: i32, msg: Option<String>) -> Self {
        Self {
            status,
            msg,
            value: None,
        }
    }

    /// Success carrying a value.
    #[must_use]
    pub const fn with_value(value: Value) -> Self {
        Self {
            status: status::OK,
            msg: None,
            value: Some(value),
        }
    }

    /// Status of the item.
    #[must_use]
    pub const fn status(&self) -> i32 {
        self.status
    }
}

impl From<ItemResult> for Value {
    fn from(item: ItemResult) -> Self {
        let mut entry = json!({ "status": item.status });
        if let Some(object) = entry.as_object_mut() {
            if let Some(msg) = item.msg {
                object.insert("msg".into(), Value::from(msg));
            }
            if let Some(value) = item.value {
                object.insert("value".into(), value);
            }
        }
        entry
    }
}
