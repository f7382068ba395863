/*
 * session.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * The gateway session: active engine, local items, and the operations
 * callers invoke.
 */

//! Gateway session.
//!
//! A [`Session`] holds everything that persists between calls: the host,
//! the engine factory, the engine for the most recently instantiated style,
//! and the registry of local items. Each operation takes the session
//! explicitly; there is no process-wide state.
//!
//! Instantiating a new style replaces the engine and clears the local
//! registry. The last instantiation wins.

use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::GatewayConfig;
use crate::engine::{CitationEngine, EngineFactory, OutputFormat, StyleClass};
use crate::error::{Error, Result};
use crate::host::{Host, SearchCondition, SearchField, SearchOperator};
use crate::key::{ItemId, ItemKey};
use crate::system::{EngineSystem, LocalItemSystem, LocalItems};

/// Creator/title/date search for a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyQuery {
    pub creator: String,
    pub title: Option<String>,
    pub date: Option<String>,
}

impl FuzzyQuery {
    pub fn new(creator: impl Into<String>) -> Self {
        Self {
            creator: creator.into(),
            title: None,
            date: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Creator and title match by substring, date exactly.
    pub fn conditions(&self) -> Vec<SearchCondition> {
        let mut conditions = vec![SearchCondition::new(
            SearchField::Creator,
            SearchOperator::Contains,
            self.creator.as_str(),
        )];
        if let Some(title) = &self.title {
            conditions.push(SearchCondition::new(
                SearchField::Title,
                SearchOperator::Contains,
                title.as_str(),
            ));
        }
        if let Some(date) = &self.date {
            conditions.push(SearchCondition::new(
                SearchField::Date,
                SearchOperator::Is,
                date.as_str(),
            ));
        }
        conditions
    }
}

/// Outcome of a [`FuzzyQuery`].
///
/// Lookup misses are reported as values here, unlike [`Session::item_id`],
/// which fails on an unknown key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzyMatch {
    Unique(ItemId),
    NotFound,
    Ambiguous,
}

impl FuzzyMatch {
    /// Wire value for "no item matched".
    pub const NOT_FOUND: i64 = -1;
    /// Wire value for "more than one item matched".
    pub const AMBIGUOUS: i64 = -2;

    pub fn from_hits(hits: &[ItemId]) -> Self {
        match hits {
            [] => FuzzyMatch::NotFound,
            [id] => FuzzyMatch::Unique(*id),
            _ => FuzzyMatch::Ambiguous,
        }
    }

    pub fn to_wire(self) -> i64 {
        match self {
            FuzzyMatch::Unique(id) => id,
            FuzzyMatch::NotFound => Self::NOT_FOUND,
            FuzzyMatch::Ambiguous => Self::AMBIGUOUS,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

pub struct Session<H: Host, F: EngineFactory> {
    host: H,
    factory: F,
    config: GatewayConfig,
    engine: Option<F::Engine>,
    style_url: Option<String>,
    local_items: LocalItems,
}

impl<H: Host, F: EngineFactory> Session<H, F> {
    pub fn new(host: H, factory: F, config: GatewayConfig) -> Self {
        Self {
            host,
            factory,
            config,
            engine: None,
            style_url: None,
            local_items: LocalItems::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// URL of the style the active engine was built for.
    pub fn style_url(&self) -> Option<&str> {
        self.style_url.as_deref()
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn local_items(&self) -> &LocalItems {
        &self.local_items
    }

    fn with_engine<T>(
        &mut self,
        op: impl FnOnce(&mut F::Engine, &dyn EngineSystem) -> Result<T>,
    ) -> Result<T> {
        let Self {
            host,
            engine,
            local_items,
            ..
        } = self;
        let engine = engine.as_mut().ok_or(Error::NoActiveEngine)?;
        let sys = LocalItemSystem::new(&*host, &*local_items);
        op(engine, &sys)
    }

    /// Resolve `[<library>_]<key>` to the item's internal id.
    pub fn item_id(&self, key: &str) -> Result<ItemId> {
        let key = ItemKey::parse(key)?;
        self.host.item_id(&key)?.ok_or(Error::ItemNotFound(key))
    }

    /// [`Session::item_id`] for each key, in order. The first unknown key
    /// fails the whole batch.
    pub fn item_ids<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<ItemId>> {
        keys.iter().map(|k| self.item_id(k.as_ref())).collect()
    }

    /// Locale for a new engine: explicit request, then the bibliography
    /// locale preference, then the application locale, then the configured
    /// default.
    pub fn resolve_locale(&self, requested: Option<&str>) -> String {
        non_empty(requested.map(str::to_string))
            .or_else(|| non_empty(self.host.bibliography_locale()))
            .or_else(|| non_empty(self.host.app_locale()))
            .unwrap_or_else(|| self.config.default_locale.clone())
    }

    /// Build an engine for `style_id` (a bare name or a URL) and make it the
    /// active engine. Returns the resolved style URL.
    ///
    /// On failure the previous engine and local items are left in place.
    pub fn instantiate(&mut self, style_id: &str, locale: Option<&str>) -> Result<String> {
        let style_url = self.config.style_url(style_id);
        let style_xml = self
            .host
            .style_xml(&style_url)?
            .ok_or_else(|| Error::StyleNotFound(style_url.clone()))?;
        let locale = self.resolve_locale(locale);

        let empty = LocalItems::new();
        let sys = LocalItemSystem::new(&self.host, &empty);
        let mut engine = match self.factory.create(&sys, &style_xml, &locale) {
            Ok(engine) => engine,
            Err(e) => {
                error!(
                    style = %style_url,
                    locale = %locale,
                    error = %e,
                    "Failed to create citation engine"
                );
                return Err(e);
            }
        };
        if let Err(e) = engine.set_output_format(OutputFormat::Html) {
            error!(style = %style_url, error = %e, "Failed to set engine output format");
            return Err(e);
        }

        self.engine = Some(engine);
        self.local_items.clear();
        self.style_url = Some(style_url.clone());

        info!(style = %style_url, locale = %locale, "Instantiated citation engine");
        Ok(style_url)
    }

    pub fn update_items(&mut self, ids: &[ItemId]) -> Result<()> {
        debug!(count = ids.len(), "Updating engine items");
        self.with_engine(|engine, sys| engine.update_items(sys, ids))
    }

    /// Insert a citation cluster and return its rendered text.
    ///
    /// The cluster's position comes from `citation.properties.index`; the
    /// engine's result entry at that position is returned, or `None` when
    /// the engine did not report one.
    pub fn append_citation_cluster(&mut self, citation: &Value) -> Result<Option<String>> {
        let index = citation
            .pointer("/properties/index")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::InvalidCitation("citation has no integer properties.index".to_string())
            })?;

        let results =
            self.with_engine(|engine, sys| engine.append_citation_cluster(sys, citation))?;
        Ok(results
            .into_iter()
            .find(|r| r.index == index)
            .map(|r| r.text))
    }

    pub fn append_citation_clusters(&mut self, citations: &[Value]) -> Result<Vec<Option<String>>> {
        citations
            .iter()
            .map(|c| self.append_citation_cluster(c))
            .collect()
    }

    /// The bibliography for the items the engine knows, or `None` if the
    /// engine produced nothing.
    pub fn make_bibliography(&mut self, options: Option<&Value>) -> Result<Option<Value>> {
        self.with_engine(|engine, sys| engine.make_bibliography(sys, options))
    }

    /// Make unsaved items visible to the engine. See [`LocalItems::register`].
    pub fn register_local_items(&mut self, items: &Value) -> Result<usize> {
        self.local_items.register(items)
    }

    pub fn is_in_text_style(&self) -> Result<bool> {
        let engine = self.engine.as_ref().ok_or(Error::NoActiveEngine)?;
        Ok(engine.style_class() == StyleClass::InText)
    }

    pub fn fuzzy_item_id(&self, query: &FuzzyQuery) -> Result<FuzzyMatch> {
        let hits = self.host.search(&query.conditions())?;
        let found = FuzzyMatch::from_hits(&hits);
        debug!(creator = %query.creator, hits = hits.len(), "Fuzzy item lookup");
        Ok(found)
    }

    pub fn fuzzy_item_ids(&self, queries: &[FuzzyQuery]) -> Result<Vec<FuzzyMatch>> {
        queries.iter().map(|q| self.fuzzy_item_id(q)).collect()
    }
}
