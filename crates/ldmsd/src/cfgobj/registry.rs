//! Per-schema object tables.
//!
//! Each schema has its own table lock, and each object its own lock. The
//! table lock is only held for structural changes (insert, remove) and for
//! taking snapshots; object operations run under the object lock alone.
//! When both are needed the table lock is taken first.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use regex::Regex;
use serde_json::{Map, Value};

use super::{CfgObjType, ConfigObject, RegistryError, SchemaObject};
use crate::locking::lock;
use crate::transport::SecurityContext;

/// Shared, lockable handle to one object.
pub type ObjectSlot = Arc<Mutex<Box<dyn ConfigObject>>>;

type Table = Mutex<BTreeMap<String, ObjectSlot>>;

/// Registry of every configuration object, keyed by schema then name.
#[derive(Default)]
pub struct ObjectRegistry {
    auth: Table,
    env: Table,
    listen: Table,
    prdcr: Table,
    updtr: Table,
    strgp: Table,
    smplr: Table,
    plugin: Table,
    setgrp: Table,
}

impl ObjectRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    const fn table(&self, schema: CfgObjType) -> &Table {
        match schema {
            CfgObjType::Auth => &self.auth,
            CfgObjType::Env => &self.env,
            CfgObjType::Listen => &self.listen,
            CfgObjType::Prdcr => &self.prdcr,
            CfgObjType::Updtr => &self.updtr,
            CfgObjType::Strgp => &self.strgp,
            CfgObjType::Smplr => &self.smplr,
            CfgObjType::Plugin => &self.plugin,
            CfgObjType::Setgrp => &self.setgrp,
        }
    }

    /// Creates and inserts an object, atomically with the existence check.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Exists`] when the name is taken and
    /// propagates attribute validation failures.
    pub fn create(
        &self,
        schema: CfgObjType,
        name: &str,
        attrs: Map<String, Value>,
        enabled: bool,
        owner: SecurityContext,
    ) -> Result<(), RegistryError> {
        self.insert_with(schema, name, || {
            SchemaObject::create(schema, name, attrs, enabled, owner)
                .map(|object| Box::new(object) as Box<dyn ConfigObject>)
        })
    }

    /// Inserts the object built by `build` unless the name is taken.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Exists`] without calling `build` when the
    /// name is taken, and propagates errors from `build`.
    pub fn insert_with<F>(&self, schema: CfgObjType, name: &str, build: F) -> Result<(), RegistryError>
    where
        F: FnOnce() -> Result<Box<dyn ConfigObject>, RegistryError>,
    {
        let mut table = lock(self.table(schema));
        if table.contains_key(name) {
            return Err(RegistryError::Exists {
                schema,
                name: name.to_owned(),
            });
        }
        let object = build()?;
        table.insert(name.to_owned(), Arc::new(Mutex::new(object)));
        Ok(())
    }

    /// Object named `name`, if present.
    #[must_use]
    pub fn find(&self, schema: CfgObjType, name: &str) -> Option<ObjectSlot> {
        lock(self.table(schema)).get(name).cloned()
    }

    /// Snapshot of the objects whose names match `pattern`, in name order.
    ///
    /// Callers iterate the snapshot, so removals made while processing it
    /// neither skip nor revisit an entry.
    #[must_use]
    pub fn select(&self, schema: CfgObjType, pattern: &Regex) -> Vec<(String, ObjectSlot)> {
        lock(self.table(schema))
            .iter()
            .filter(|(name, _)| pattern.is_match(name))
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect()
    }

    /// Snapshot of every object of `schema`, in name order.
    #[must_use]
    pub fn all(&self, schema: CfgObjType) -> Vec<(String, ObjectSlot)> {
        lock(self.table(schema))
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect()
    }

    /// Names of the objects of `schema`, in order.
    #[must_use]
    pub fn names(&self, schema: CfgObjType) -> Vec<String> {
        lock(self.table(schema)).keys().cloned().collect()
    }

    /// Runs the object's delete operation and removes it on success.
    ///
    /// The table lock is held throughout, so a concurrent lookup sees the
    /// object either fully present or gone. Slots taken out earlier see the
    /// object marked removed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when absent,
    /// [`RegistryError::PermissionDenied`] when `requester` may not modify
    /// it, and propagates the object's own refusal.
    pub fn remove(
        &self,
        schema: CfgObjType,
        name: &str,
        requester: SecurityContext,
    ) -> Result<(), RegistryError> {
        let mut table = lock(self.table(schema));
        let slot = table.get(name).ok_or_else(|| RegistryError::NotFound {
            schema,
            name: name.to_owned(),
        })?;
        {
            let mut object = lock(slot);
            if !object.header().permits(requester) {
                return Err(RegistryError::PermissionDenied {
                    name: name.to_owned(),
                });
            }
            object.delete()?;
            object.header_mut().removed = true;
        }
        table.remove(name);
        Ok(())
    }

    /// Number of objects in `schema`.
    #[must_use]
    pub fn len(&self, schema: CfgObjType) -> usize {
        lock(self.table(schema)).len()
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ObjectRegistry")
            .field("prdcr", &self.len(CfgObjType::Prdcr))
            .field("updtr", &self.len(CfgObjType::Updtr))
            .field("smplr", &self.len(CfgObjType::Smplr))
            .finish_non_exhaustive()
    }
}
