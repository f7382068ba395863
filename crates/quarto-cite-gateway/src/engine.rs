/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * The citation engine interface.
 */

//! Citation engine interface.
//!
//! The gateway does no CSL processing of its own. Style evaluation, locale
//! handling, disambiguation and bibliography layout all happen inside a
//! [`CitationEngine`], created per style by an [`EngineFactory`]. Engines
//! call back into the gateway for items and locales through the
//! [`EngineSystem`] passed to each operation.
//!
//! [`process`] provides an engine that runs as a child process.

pub mod process;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::key::ItemId;
use crate::system::EngineSystem;

/// Output markup produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Html,
    Text,
    Rtf,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Text => "text",
            OutputFormat::Rtf => "rtf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a style cites in running text or in notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StyleClass {
    #[serde(rename = "in-text")]
    InText,
    #[serde(rename = "note")]
    Note,
}

impl FromStr for StyleClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in-text" => Ok(StyleClass::InText),
            "note" => Ok(StyleClass::Note),
            other => Err(Error::Engine(format!("unknown style class '{}'", other))),
        }
    }
}

/// One entry of the engine's per-cluster output after inserting a cluster.
///
/// Inserting a cluster can change the rendering of earlier clusters, so the
/// engine reports every cluster whose text changed, keyed by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterResult {
    pub index: i64,
    pub text: String,
}

impl ClusterResult {
    pub fn new(index: i64, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Parse the engine's `[[index, text], ...]` result list.
    ///
    /// Non-string text values are kept in their JSON form.
    pub fn parse_list(value: &Value) -> Result<Vec<ClusterResult>> {
        let entries = value.as_array().ok_or_else(|| {
            Error::EngineProtocol(format!("expected cluster result list, got {}", value))
        })?;

        entries
            .iter()
            .map(|entry| {
                let index = entry.get(0).and_then(Value::as_i64);
                let text = entry.get(1);
                match (index, text) {
                    (Some(index), Some(Value::String(text))) => {
                        Ok(ClusterResult::new(index, text.as_str()))
                    }
                    (Some(index), Some(other)) => Ok(ClusterResult::new(index, other.to_string())),
                    _ => Err(Error::EngineProtocol(format!(
                        "malformed cluster result entry: {}",
                        entry
                    ))),
                }
            })
            .collect()
    }
}

/// A style-bound citation processor.
pub trait CitationEngine {
    /// Select the markup used for all later output.
    fn set_output_format(&mut self, format: OutputFormat) -> Result<()>;

    /// Refresh the engine's registry with the given items.
    fn update_items(&mut self, sys: &dyn EngineSystem, ids: &[ItemId]) -> Result<()>;

    /// Insert a citation cluster and return the clusters whose text changed.
    fn append_citation_cluster(
        &mut self,
        sys: &dyn EngineSystem,
        citation: &Value,
    ) -> Result<Vec<ClusterResult>>;

    /// Build the bibliography for the registered items.
    ///
    /// Returns `None` when the style produces no bibliography.
    fn make_bibliography(
        &mut self,
        sys: &dyn EngineSystem,
        options: Option<&Value>,
    ) -> Result<Option<Value>>;

    fn style_class(&self) -> StyleClass;
}

/// Creates engines bound to a style and locale.
pub trait EngineFactory {
    type Engine: CitationEngine;

    fn create(
        &self,
        sys: &dyn EngineSystem,
        style_xml: &str,
        locale: &str,
    ) -> Result<Self::Engine>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_cluster_list() {
        let results =
            ClusterResult::parse_list(&json!([[0, "(Smith 2020)"], [1, "(Jones 2019)"]])).unwrap();
        assert_eq!(
            results,
            vec![
                ClusterResult::new(0, "(Smith 2020)"),
                ClusterResult::new(1, "(Jones 2019)")
            ]
        );
    }

    #[test]
    fn test_parse_cluster_list_stringifies_text() {
        let results = ClusterResult::parse_list(&json!([[3, 42]])).unwrap();
        assert_eq!(results, vec![ClusterResult::new(3, "42")]);
    }

    #[test]
    fn test_parse_cluster_list_rejects_malformed() {
        assert!(ClusterResult::parse_list(&json!({"0": "x"})).is_err());
        assert!(ClusterResult::parse_list(&json!([["zero", "x"]])).is_err());
        assert!(ClusterResult::parse_list(&json!([[0]])).is_err());
    }

    #[test]
    fn test_style_class_from_str() {
        assert_eq!("in-text".parse::<StyleClass>().unwrap(), StyleClass::InText);
        assert_eq!("note".parse::<StyleClass>().unwrap(), StyleClass::Note);
        assert!("footnote".parse::<StyleClass>().is_err());
    }

    #[test]
    fn test_output_format_names() {
        assert_eq!(OutputFormat::Html.to_string(), "html");
        assert_eq!(serde_json::to_value(OutputFormat::Rtf).unwrap(), json!("rtf"));
    }
}
