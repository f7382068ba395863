/*
 * host.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * The host interface: item store, styles, locales, and preferences.
 */

//! Host abstraction.
//!
//! The gateway never reaches into the reference manager directly. Everything
//! it needs from the host goes through the [`Host`] trait:
//!
//! - item lookup by library and key, by internal id, and by search
//! - style and locale definitions
//! - locale preferences
//!
//! [`crate::library::JsonLibrary`] is the file-backed implementation used by
//! the `cite-gateway` binary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::key::{ItemId, ItemKey};

/// Item field a search condition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Creator,
    Title,
    Date,
}

/// How a search condition compares its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchOperator {
    Contains,
    Is,
}

/// A single condition of an item search. Conditions are combined with AND.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCondition {
    pub field: SearchField,
    pub operator: SearchOperator,
    pub value: String,
}

impl SearchCondition {
    pub fn new(field: SearchField, operator: SearchOperator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
        }
    }
}

/// Everything the gateway needs from the reference manager.
pub trait Host {
    /// Internal id of the item with the given library and key.
    fn item_id(&self, key: &ItemKey) -> Result<Option<ItemId>>;

    /// CSL-JSON record for an item.
    fn item_data(&self, id: ItemId) -> Result<Option<Value>>;

    /// Ids of all items matching every condition.
    fn search(&self, conditions: &[SearchCondition]) -> Result<Vec<ItemId>>;

    /// CSL source for a style, addressed by its full URL.
    fn style_xml(&self, style_url: &str) -> Result<Option<String>>;

    /// CSL locale source for a language tag such as `en-US`.
    fn locale_xml(&self, lang: &str) -> Result<Option<String>>;

    /// The `export.bibliographyLocale` preference.
    fn bibliography_locale(&self) -> Option<String>;

    /// The application's UI locale.
    fn app_locale(&self) -> Option<String>;
}
