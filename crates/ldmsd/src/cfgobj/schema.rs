//! Attribute catalogs and the catalog-driven object implementation.

use serde_json::{Map, Value};

use super::{CfgObjType, ConfigObject, ObjectHeader, RegistryError, Update, describe, exported};
use crate::transport::SecurityContext;

/// JSON type an attribute must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// JSON string.
    String,
    /// JSON integer.
    Integer,
    /// JSON boolean.
    Boolean,
    /// JSON list of strings.
    StringList,
    /// JSON object.
    Object,
}

impl AttrKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Object => value.is_object(),
        }
    }

    const fn describe(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
            Self::StringList => "a list of strings",
            Self::Object => "a dictionary",
        }
    }
}

/// One attribute a schema understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSpec {
    /// Attribute name.
    pub name: &'static str,
    /// Expected JSON type.
    pub kind: AttrKind,
    /// Whether `create` must supply it.
    pub required: bool,
}

const fn required(name: &'static str, kind: AttrKind) -> AttrSpec {
    AttrSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: AttrKind) -> AttrSpec {
    AttrSpec {
        name,
        kind,
        required: false,
    }
}

const AUTH: &[AttrSpec] = &[
    required("plugin", AttrKind::String),
    optional("conf", AttrKind::String),
];

const ENV: &[AttrSpec] = &[required("value", AttrKind::String)];

const LISTEN: &[AttrSpec] = &[
    required("xprt", AttrKind::String),
    required("port", AttrKind::Integer),
    optional("host", AttrKind::String),
    optional("auth", AttrKind::String),
];

const PRDCR: &[AttrSpec] = &[
    required("host", AttrKind::String),
    required("port", AttrKind::Integer),
    optional("xprt", AttrKind::String),
    optional("type", AttrKind::String),
    optional("interval", AttrKind::Integer),
    optional("auth", AttrKind::String),
];

const UPDTR: &[AttrSpec] = &[
    required("interval", AttrKind::Integer),
    optional("offset", AttrKind::Integer),
    optional("producers", AttrKind::StringList),
    optional("sets", AttrKind::StringList),
    optional("push", AttrKind::Boolean),
];

const STRGP: &[AttrSpec] = &[
    required("plugin", AttrKind::String),
    required("container", AttrKind::String),
    optional("schema", AttrKind::String),
    optional("producers", AttrKind::StringList),
    optional("metrics", AttrKind::StringList),
];

const SMPLR: &[AttrSpec] = &[
    required("plugin", AttrKind::String),
    required("interval", AttrKind::Integer),
    optional("instance", AttrKind::String),
    optional("offset", AttrKind::Integer),
];

const PLUGIN: &[AttrSpec] = &[
    optional("path", AttrKind::String),
    optional("config", AttrKind::Object),
];

const SETGRP: &[AttrSpec] = &[
    optional("producer", AttrKind::String),
    optional("interval", AttrKind::Integer),
    optional("members", AttrKind::StringList),
];

impl CfgObjType {
    /// Attributes objects of this schema accept.
    #[must_use]
    pub const fn catalog(self) -> &'static [AttrSpec] {
        match self {
            Self::Auth => AUTH,
            Self::Env => ENV,
            Self::Listen => LISTEN,
            Self::Prdcr => PRDCR,
            Self::Updtr => UPDTR,
            Self::Strgp => STRGP,
            Self::Smplr => SMPLR,
            Self::Plugin => PLUGIN,
            Self::Setgrp => SETGRP,
        }
    }
}

fn check_attrs(
    catalog: &[AttrSpec],
    attrs: &Map<String, Value>,
    require_all: bool,
) -> Result<(), RegistryError> {
    for (name, value) in attrs {
        let Some(spec) = catalog.iter().find(|spec| spec.name == name) else {
            return Err(RegistryError::invalid(format!(
                "'{name}' is not a valid attribute."
            )));
        };
        if !spec.kind.accepts(value) {
            return Err(RegistryError::invalid(format!(
                "'{name}' must be {}.",
                spec.kind.describe()
            )));
        }
    }
    if require_all
        && let Some(missing) = catalog
            .iter()
            .find(|spec| spec.required && !attrs.contains_key(spec.name))
    {
        return Err(RegistryError::invalid(format!(
            "'{}' is missing.",
            missing.name
        )));
    }
    Ok(())
}

/// Object whose attributes are checked against its schema's catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaObject {
    header: ObjectHeader,
    attrs: Map<String, Value>,
}

impl SchemaObject {
    /// Validates `attrs` and builds a new object owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Invalid`] for unknown, ill-typed or missing
    /// required attributes.
    pub fn create(
        schema: CfgObjType,
        name: &str,
        attrs: Map<String, Value>,
        enabled: bool,
        owner: SecurityContext,
    ) -> Result<Self, RegistryError> {
        check_attrs(schema.catalog(), &attrs, true)?;
        Ok(Self {
            header: ObjectHeader::new(name, schema, enabled, owner),
            attrs,
        })
    }

    /// Current attributes.
    #[must_use]
    pub const fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }
}

impl ConfigObject for SchemaObject {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ObjectHeader {
        &mut self.header
    }

    fn update(&mut self, update: &Update<'_>) -> Result<(), RegistryError> {
        let changes = update.changes();
        if !changes.is_empty() {
            if self.header.enabled && update.enabled != Some(false) {
                return Err(RegistryError::Busy {
                    name: self.header.name.clone(),
                });
            }
            check_attrs(self.header.schema.catalog(), &changes, false)?;
            self.attrs.extend(changes);
        }
        if let Some(enabled) = update.enabled {
            self.header.enabled = enabled;
        }
        Ok(())
    }

    fn delete(&mut self) -> Result<(), RegistryError> {
        if self.header.enabled {
            return Err(RegistryError::Busy {
                name: self.header.name.clone(),
            });
        }
        Ok(())
    }

    fn query(&self) -> Value {
        describe(&self.header, &self.attrs)
    }

    fn export(&self) -> Value {
        exported(&self.header, &self.attrs)
    }
}
