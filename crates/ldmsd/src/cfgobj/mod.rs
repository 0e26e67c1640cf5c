//! Typed, named configuration objects.
//!
//! Every object belongs to one schema and carries a common
//! [`ObjectHeader`]. The behaviour of each schema sits behind the
//! [`ConfigObject`] trait; the stock implementation is [`SchemaObject`],
//! which validates attributes against a static catalog per schema.

mod errors;
mod events;
mod registry;
mod schema;

use serde_json::{Map, Value, json};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::transport::SecurityContext;

pub use self::errors::RegistryError;
pub use self::events::{EventSink, LifecycleEvent, TracingEventSink};
pub use self::registry::{ObjectRegistry, ObjectSlot};
pub use self::schema::{AttrKind, AttrSpec, SchemaObject};

/// Schemas a configuration object can belong to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display, EnumIter, AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum CfgObjType {
    /// Authentication domain.
    Auth,
    /// Daemon environment variable.
    Env,
    /// Listening endpoint.
    Listen,
    /// Producer: a connection to another daemon.
    Prdcr,
    /// Updater pulling sets from producers.
    Updtr,
    /// Storage policy.
    Strgp,
    /// Sampler policy.
    Smplr,
    /// Loaded plugin instance.
    Plugin,
    /// Set group.
    Setgrp,
}

/// Fields every configuration object carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Name, unique within the schema.
    pub name: String,
    /// Schema of the object.
    pub schema: CfgObjType,
    /// Whether the object is active.
    pub enabled: bool,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Set once the registry has dropped the object; holders of an earlier
    /// snapshot treat it as absent.
    pub removed: bool,
}

impl ObjectHeader {
    /// Header for a new object owned by `owner`.
    pub fn new(
        name: impl Into<String>,
        schema: CfgObjType,
        enabled: bool,
        owner: SecurityContext,
    ) -> Self {
        Self {
            name: name.into(),
            schema,
            enabled,
            uid: owner.uid,
            gid: owner.gid,
            removed: false,
        }
    }

    /// Whether `requester` may modify or remove the object.
    #[must_use]
    pub const fn permits(&self, requester: SecurityContext) -> bool {
        requester.is_root() || requester.uid == self.uid
    }

    fn to_json(&self) -> Map<String, Value> {
        let mut header = Map::new();
        header.insert("name".into(), Value::from(self.name.as_str()));
        header.insert("schema".into(), Value::from(self.schema.as_ref()));
        header.insert("enabled".into(), Value::from(self.enabled));
        header.insert("uid".into(), Value::from(self.uid));
        header.insert("gid".into(), Value::from(self.gid));
        header
    }
}

/// Attribute changes carried by an update.
#[derive(Debug, Clone, Copy, Default)]
pub struct Update<'a> {
    /// New enabled state, when the request names one.
    pub enabled: Option<bool>,
    /// Attributes applied first, beneath `attrs`.
    pub defaults: Option<&'a Map<String, Value>>,
    /// Per-object attributes.
    pub attrs: Option<&'a Map<String, Value>>,
}

impl Update<'_> {
    /// Merged attribute changes, object attributes winning over defaults.
    #[must_use]
    pub fn changes(&self) -> Map<String, Value> {
        let mut merged = self.defaults.cloned().unwrap_or_default();
        if let Some(attrs) = self.attrs {
            for (name, value) in attrs {
                merged.insert(name.clone(), value.clone());
            }
        }
        merged
    }
}

/// Operations every schema implements.
pub trait ConfigObject: Send {
    /// Common fields.
    fn header(&self) -> &ObjectHeader;

    /// Common fields, for the registry's bookkeeping.
    fn header_mut(&mut self) -> &mut ObjectHeader;

    /// Applies an update in place.
    ///
    /// # Errors
    ///
    /// Rejects invalid attributes and changes to an enabled object that is
    /// not being disabled by the same update.
    fn update(&mut self, update: &Update<'_>) -> Result<(), RegistryError>;

    /// Prepares the object for removal.
    ///
    /// # Errors
    ///
    /// Refuses to delete an enabled object.
    fn delete(&mut self) -> Result<(), RegistryError>;

    /// Full description of the object.
    fn query(&self) -> Value;

    /// Form that recreates the object through `create`.
    fn export(&self) -> Value;
}

pub(crate) fn describe(header: &ObjectHeader, attrs: &Map<String, Value>) -> Value {
    let mut object = header.to_json();
    object.insert("attributes".into(), Value::Object(attrs.clone()));
    Value::Object(object)
}

pub(crate) fn exported(header: &ObjectHeader, attrs: &Map<String, Value>) -> Value {
    json!({
        "schema": header.schema.as_ref(),
        "enabled": header.enabled,
        "spec": { header.name.as_str(): attrs },
    })
}
