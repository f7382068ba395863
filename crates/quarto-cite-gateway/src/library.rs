/*
 * library.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * File-backed host: items, styles, locales and preferences on disk.
 */

//! A [`Host`] backed by a library directory.
//!
//! ```text
//! <root>/
//!   items.json                 [{"id": 1, "library": 0, "key": "ABCD1234", "data": {CSL-JSON}}]
//!   prefs.json                 {"locale": "en-US", "bibliographyLocale": "de-DE"}   (optional)
//!   styles/<name>.csl          style for <base-url><name>
//!   locales/locales-<lang>.xml
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::host::{Host, SearchCondition, SearchField, SearchOperator};
use crate::key::{ItemId, ItemKey, LibraryId};

/// Name roles searched by a creator condition.
const CREATOR_ROLES: &[&str] = &["author", "editor", "translator", "container-author"];

/// One entry of `items.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LibraryItem {
    pub id: ItemId,
    #[serde(default)]
    pub library: u32,
    pub key: String,
    pub data: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Prefs {
    locale: Option<String>,
    bibliography_locale: Option<String>,
}

pub struct JsonLibrary {
    root: PathBuf,
    items: BTreeMap<ItemId, LibraryItem>,
    keys: HashMap<ItemKey, ItemId>,
    prefs: Prefs,
}

impl JsonLibrary {
    /// Load the library rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        let items_path = root.join("items.json");
        let content = fs::read_to_string(&items_path)?;
        let entries: Vec<LibraryItem> = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", items_path.display(), e)))?;

        let prefs_path = root.join("prefs.json");
        let prefs = if prefs_path.exists() {
            let content = fs::read_to_string(&prefs_path)?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", prefs_path.display(), e)))?
        } else {
            Prefs::default()
        };

        let library = Self::from_items(root, entries)?;
        let library = Self { prefs, ..library };

        info!(
            root = %library.root.display(),
            items = library.items.len(),
            "Opened library"
        );
        Ok(library)
    }

    fn from_items(root: PathBuf, entries: Vec<LibraryItem>) -> Result<Self> {
        let mut items = BTreeMap::new();
        let mut keys = HashMap::new();
        for entry in entries {
            let key = ItemKey::new(LibraryId(entry.library), entry.key.as_str());
            if keys.insert(key.clone(), entry.id).is_some() {
                return Err(Error::Config(format!("duplicate item key '{}'", key)));
            }
            let id = entry.id;
            if items.insert(id, entry).is_some() {
                return Err(Error::Config(format!("duplicate item id {}", id)));
            }
        }

        Ok(Self {
            root,
            items,
            keys,
            prefs: Prefs::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn read_optional(&self, path: PathBuf) -> Result<Option<String>> {
        if !path.is_file() {
            debug!(path = %path.display(), "Not found in library");
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }
}

/// Last path segment of a style URL, if it is a plain file name.
fn style_file_name(style_url: &str) -> Option<&str> {
    let path = style_url.split(['?', '#']).next().unwrap_or("");
    let name = path.trim_end_matches('/').rsplit('/').next()?;
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    valid.then_some(name)
}

fn is_locale_tag(lang: &str) -> bool {
    !lang.is_empty() && lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn creator_values(data: &Value) -> Vec<String> {
    let mut values = Vec::new();
    for role in CREATOR_ROLES {
        let Some(names) = data.get(*role).and_then(Value::as_array) else {
            continue;
        };
        for name in names {
            let family = name.get("family").and_then(Value::as_str);
            let given = name.get("given").and_then(Value::as_str);
            let literal = name.get("literal").and_then(Value::as_str);
            values.extend([family, given, literal].into_iter().flatten().map(str::to_string));
            if let (Some(given), Some(family)) = (given, family) {
                values.push(format!("{} {}", given, family));
            }
        }
    }
    values
}

fn title_values(data: &Value) -> Vec<String> {
    data.get("title")
        .and_then(Value::as_str)
        .map(|t| vec![t.to_string()])
        .unwrap_or_default()
}

fn date_part(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `issued` as comparable strings: raw and literal forms, plus `YYYY`,
/// `YYYY-MM` and `YYYY-MM-DD` from the first date-parts entry.
fn date_values(data: &Value) -> Vec<String> {
    let Some(issued) = data.get("issued") else {
        return Vec::new();
    };

    let mut values: Vec<String> = ["raw", "literal"]
        .iter()
        .filter_map(|field| issued.get(*field).and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    let parts: Vec<i64> = issued
        .pointer("/date-parts/0")
        .and_then(Value::as_array)
        .map(|parts| parts.iter().map_while(date_part).collect())
        .unwrap_or_default();

    if let Some(year) = parts.first() {
        values.push(format!("{:04}", year));
        if let Some(month) = parts.get(1) {
            values.push(format!("{:04}-{:02}", year, month));
            if let Some(day) = parts.get(2) {
                values.push(format!("{:04}-{:02}-{:02}", year, month, day));
            }
        }
    }
    values
}

fn condition_matches(data: &Value, condition: &SearchCondition) -> bool {
    let values = match condition.field {
        SearchField::Creator => creator_values(data),
        SearchField::Title => title_values(data),
        SearchField::Date => date_values(data),
    };
    let needle = condition.value.to_lowercase();
    values.iter().any(|value| {
        let value = value.to_lowercase();
        match condition.operator {
            SearchOperator::Contains => value.contains(&needle),
            SearchOperator::Is => value == needle,
        }
    })
}

impl Host for JsonLibrary {
    fn item_id(&self, key: &ItemKey) -> Result<Option<ItemId>> {
        Ok(self.keys.get(key).copied())
    }

    fn item_data(&self, id: ItemId) -> Result<Option<Value>> {
        Ok(self.items.get(&id).map(|item| {
            let mut data = item.data.clone();
            if let Value::Object(map) = &mut data {
                map.insert("id".to_string(), Value::from(id));
            }
            data
        }))
    }

    fn search(&self, conditions: &[SearchCondition]) -> Result<Vec<ItemId>> {
        Ok(self
            .items
            .values()
            .filter(|item| conditions.iter().all(|c| condition_matches(&item.data, c)))
            .map(|item| item.id)
            .collect())
    }

    fn style_xml(&self, style_url: &str) -> Result<Option<String>> {
        match style_file_name(style_url) {
            Some(name) => {
                let name = name.strip_suffix(".csl").unwrap_or(name);
                self.read_optional(self.root.join("styles").join(format!("{}.csl", name)))
            }
            None => Ok(None),
        }
    }

    fn locale_xml(&self, lang: &str) -> Result<Option<String>> {
        if !is_locale_tag(lang) {
            return Ok(None);
        }
        self.read_optional(
            self.root
                .join("locales")
                .join(format!("locales-{}.xml", lang)),
        )
    }

    fn bibliography_locale(&self) -> Option<String> {
        self.prefs.bibliography_locale.clone()
    }

    fn app_locale(&self) -> Option<String> {
        self.prefs.locale.clone()
    }
}
