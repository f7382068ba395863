/*
 * system.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Engine callbacks and the registry of local (unsaved) items.
 */

//! The engine's view of the world.
//!
//! A citation engine pulls item records and locale definitions on demand
//! through [`EngineSystem`]. The gateway answers those callbacks with
//! [`LocalItemSystem`], which lets items registered through
//! [`LocalItems::register`] take part in citations before the host has
//! stored them.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::key::ItemId;

/// Callbacks a citation engine makes while formatting.
pub trait EngineSystem {
    /// CSL locale source for `lang`, if the host has one.
    fn retrieve_locale(&self, lang: &str) -> Result<Option<String>>;

    /// CSL-JSON record for the item the engine knows as `id`.
    fn retrieve_item(&self, id: &str) -> Result<Value>;
}

/// Registry key for an item id: strings as-is, integers in decimal.
pub fn registry_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Items supplied by the caller that are not (yet) in the host's store.
#[derive(Debug, Default, Clone)]
pub struct LocalItems {
    items: HashMap<String, Value>,
}

impl LocalItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register item records, each keyed by its own `id` field.
    ///
    /// `records` may be an array of records or an object whose values are
    /// records. A record without a string or integer `id` is rejected and
    /// nothing from the call is registered.
    pub fn register(&mut self, records: &Value) -> Result<usize> {
        let records: Vec<&Value> = match records {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => map.values().collect(),
            other => {
                return Err(Error::InvalidItem(format!(
                    "expected an array or object of items, got {}",
                    other
                )));
            }
        };

        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            let key = record
                .get("id")
                .and_then(registry_key)
                .ok_or_else(|| Error::InvalidItem(format!("item has no usable 'id': {}", record)))?;
            staged.push((key, record.clone()));
        }

        let count = staged.len();
        for (key, record) in staged {
            debug!(id = %key, "Registered local item");
            self.items.insert(key, record);
        }
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// [`EngineSystem`] backed by the local registry first, then the host.
pub struct LocalItemSystem<'a, H: Host + ?Sized> {
    host: &'a H,
    local: &'a LocalItems,
}

impl<'a, H: Host + ?Sized> LocalItemSystem<'a, H> {
    pub fn new(host: &'a H, local: &'a LocalItems) -> Self {
        Self { host, local }
    }
}

impl<H: Host + ?Sized> EngineSystem for LocalItemSystem<'_, H> {
    fn retrieve_locale(&self, lang: &str) -> Result<Option<String>> {
        self.host.locale_xml(lang)
    }

    fn retrieve_item(&self, id: &str) -> Result<Value> {
        if let Some(item) = self.local.get(id) {
            return Ok(item.clone());
        }

        let item_id: ItemId = id
            .parse()
            .map_err(|_| Error::UnknownItem(id.to_string()))?;
        self.host
            .item_data(item_id)?
            .ok_or_else(|| Error::UnknownItem(id.to_string()))
    }
}
